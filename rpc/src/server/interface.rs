//!
//! Service registry: named services carrying boxed async method handlers.
//!
//! There is no runtime reflection here. The admitted handler shape
//! `Fn(ctx, args) -> Result<reply, RpcError>` is enforced by the closure
//! signature at compile time, and each boxed entry owns its own parameter
//! decoder and reply encoder. What the compiler cannot see (duplicate or
//! empty registrations) is validated in [`Interface::register`].
//!

use crate::codec;
use crate::context::RequestContext;
use crate::error::{INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};
use crate::imports::*;
use prost_reflect::ReflectMessage;

/// Base trait representing a registered RPC method, used to retain method
/// entries in a [`Service`] map without generics.
#[async_trait]
pub(crate) trait MethodHandler: Send + Sync + 'static {
    /// `encoding` is the server-wide codec selection, kept in the signature
    /// for uniformity across handler kinds. The two built-in entry types
    /// intentionally ignore it: the registered parameter/reply types fix
    /// the codec ([`Method`] is serde-typed, [`SchemaMethod`] is
    /// schema-typed), so there is no runtime choice left to make.
    async fn call(
        &self,
        ctx: RequestContext,
        params: Option<&RawValue>,
        encoding: Encoding,
    ) -> std::result::Result<Box<RawValue>, RpcError>;
}

impl std::fmt::Debug for dyn MethodHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn MethodHandler")
    }
}

pub(crate) type DynMethod = Arc<dyn MethodHandler>;

/// RPC method function type
pub type MethodFn<Req, Resp> =
    Arc<Box<dyn Send + Sync + Fn(RequestContext, Req) -> MethodFnReturn<Resp> + 'static>>;

/// RPC method function return type
pub type MethodFnReturn<T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, RpcError>> + Send + 'static>>;

/// An RPC method whose parameters and reply travel through serde. The
/// request type is freshly constructed (via `Default`) when the call
/// carries no params.
pub struct Method<Req, Resp>
where
    Req: DeserializeOwned + Default + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    method: MethodFn<Req, Resp>,
}

impl<Req, Resp> Method<Req, Resp>
where
    Req: DeserializeOwned + Default + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    pub fn new<FN, Fut>(method_fn: FN) -> Method<Req, Resp>
    where
        FN: Send + Sync + 'static + Fn(RequestContext, Req) -> Fut,
        Fut: Future<Output = std::result::Result<Resp, RpcError>> + Send + 'static,
    {
        Method {
            method: Arc::new(Box::new(move |ctx, req| Box::pin(method_fn(ctx, req)))),
        }
    }
}

#[async_trait]
impl<Req, Resp> MethodHandler for Method<Req, Resp>
where
    Req: DeserializeOwned + Default + Send + Sync + 'static,
    Resp: Serialize + Send + Sync + 'static,
{
    async fn call(
        &self,
        ctx: RequestContext,
        params: Option<&RawValue>,
        _encoding: Encoding,
    ) -> std::result::Result<Box<RawValue>, RpcError> {
        let req = match params {
            Some(raw) => codec::json::decode_params::<Req>(raw).map_err(|err| {
                RpcError::system(INVALID_PARAMS, Some(Value::String(err.to_string())))
            })?,
            None => Req::default(),
        };
        let reply = (self.method)(ctx, req).await?;
        codec::json::encode_reply(&reply)
            .map_err(|err| RpcError::system(INTERNAL_ERROR, Some(Value::String(err.to_string()))))
    }
}

/// An RPC method whose parameters and reply are schema-defined protobuf
/// messages. Params decode through the schema-driven JSON codec, and the
/// reply is encoded with it regardless of the configured server encoding.
pub struct SchemaMethod<Req, Resp>
where
    Req: ReflectMessage + Default + Send + 'static,
    Resp: ReflectMessage + Send + 'static,
{
    method: MethodFn<Req, Resp>,
}

impl<Req, Resp> SchemaMethod<Req, Resp>
where
    Req: ReflectMessage + Default + Send + 'static,
    Resp: ReflectMessage + Send + 'static,
{
    pub fn new<FN, Fut>(method_fn: FN) -> SchemaMethod<Req, Resp>
    where
        FN: Send + Sync + 'static + Fn(RequestContext, Req) -> Fut,
        Fut: Future<Output = std::result::Result<Resp, RpcError>> + Send + 'static,
    {
        SchemaMethod {
            method: Arc::new(Box::new(move |ctx, req| Box::pin(method_fn(ctx, req)))),
        }
    }
}

#[async_trait]
impl<Req, Resp> MethodHandler for SchemaMethod<Req, Resp>
where
    Req: ReflectMessage + Default + Send + Sync + 'static,
    Resp: ReflectMessage + Send + Sync + 'static,
{
    async fn call(
        &self,
        ctx: RequestContext,
        params: Option<&RawValue>,
        _encoding: Encoding,
    ) -> std::result::Result<Box<RawValue>, RpcError> {
        let req = match params {
            Some(raw) => codec::proto::decode_params::<Req>(raw).map_err(|err| {
                RpcError::system(INVALID_PARAMS, Some(Value::String(err.to_string())))
            })?,
            None => Req::default(),
        };
        let reply = (self.method)(ctx, req).await?;
        codec::proto::encode_reply(&reply)
            .map_err(|err| RpcError::system(INTERNAL_ERROR, Some(Value::String(err.to_string()))))
    }
}

/// A named collection of methods. Built with the fluent `method`/
/// `schema_method` calls and handed to [`Interface::register`].
pub struct Service {
    name: String,
    methods: AHashMap<String, DynMethod>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Service {
        Service {
            name: name.into(),
            methods: AHashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a serde-typed RPC method handler.
    pub fn method<Req, Resp>(self, name: impl Into<String>, method: Method<Req, Resp>) -> Service
    where
        Req: DeserializeOwned + Default + Send + Sync + 'static,
        Resp: Serialize + Send + Sync + 'static,
    {
        self.insert(name.into(), Arc::new(method))
    }

    /// Declare a schema-typed RPC method handler.
    pub fn schema_method<Req, Resp>(
        self,
        name: impl Into<String>,
        method: SchemaMethod<Req, Resp>,
    ) -> Service
    where
        Req: ReflectMessage + Default + Send + Sync + 'static,
        Resp: ReflectMessage + Send + Sync + 'static,
    {
        self.insert(name.into(), Arc::new(method))
    }

    fn insert(mut self, name: String, handler: DynMethod) -> Service {
        if self.methods.insert(name.clone(), handler).is_some() {
            panic!("RPC method {name} is declared multiple times")
        }
        self
    }
}

/// Mapping from service name to its registered methods. Read-mostly:
/// concurrent lookups are expected during serving, late registration is
/// permitted and atomic.
#[derive(Default)]
pub struct Interface {
    services: RwLock<AHashMap<String, Arc<Service>>>,
}

impl Interface {
    pub fn new() -> Interface {
        Interface::default()
    }

    pub fn register(&self, service: Service) -> Result<()> {
        if service.name.is_empty() {
            return Err(Error::Registration(
                "rpc: no service name for registration".to_string(),
            ));
        }
        if service.methods.is_empty() {
            return Err(Error::Registration(format!(
                "rpc: service {} has no registered methods of suitable type",
                service.name
            )));
        }
        let Ok(mut services) = self.services.write() else {
            return Err(Error::Registration("rpc: registry lock poisoned".to_string()));
        };
        if services.contains_key(&service.name) {
            return Err(Error::Registration(format!(
                "rpc: service already defined: {}",
                service.name
            )));
        }
        services.insert(service.name.clone(), Arc::new(service));
        Ok(())
    }

    /// Split the dotted method name at the last `.` and look the handler
    /// up. Every resolution failure is a method-not-found error carrying
    /// the full method string.
    pub(crate) fn resolve(&self, full_method: &str) -> std::result::Result<DynMethod, RpcError> {
        let Some((service_name, method_name)) = full_method.rsplit_once('.') else {
            return Err(RpcError::system(
                METHOD_NOT_FOUND,
                Some(Value::String(format!(
                    "rpc: service/method request ill-formed: {full_method}"
                ))),
            ));
        };

        let Ok(services) = self.services.read() else {
            return Err(RpcError::system(INTERNAL_ERROR, None));
        };
        let Some(service) = services.get(service_name) else {
            return Err(RpcError::system(
                METHOD_NOT_FOUND,
                Some(Value::String(format!(
                    "rpc: can't find service: {full_method}"
                ))),
            ));
        };
        let Some(method) = service.methods.get(method_name) else {
            return Err(RpcError::system(
                METHOD_NOT_FOUND,
                Some(Value::String(format!(
                    "rpc: can't find method: {full_method}"
                ))),
            ));
        };
        Ok(method.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_service(name: &str) -> Service {
        Service::new(name).method(
            "Echo",
            Method::new(|_ctx: RequestContext, req: Value| async move { Ok(req) }),
        )
    }

    #[test]
    fn register_and_resolve() {
        let interface = Interface::new();
        interface.register(echo_service("rpc")).unwrap();
        assert!(interface.resolve("rpc.Echo").is_ok());
    }

    #[test]
    fn duplicate_service_is_rejected() {
        let interface = Interface::new();
        interface.register(echo_service("rpc")).unwrap();
        let err = interface.register(echo_service("rpc")).unwrap_err();
        assert!(err.to_string().contains("already defined"));
    }

    #[test]
    fn empty_service_is_rejected() {
        let interface = Interface::new();
        let err = interface.register(Service::new("rpc")).unwrap_err();
        assert!(err.to_string().contains("no registered methods"));
    }

    #[test]
    fn lookup_splits_at_the_last_dot() {
        let interface = Interface::new();
        interface.register(echo_service("a.b")).unwrap();
        assert!(interface.resolve("a.b.Echo").is_ok());
    }

    #[test]
    fn missing_separator_is_method_not_found() {
        let interface = Interface::new();
        let err = interface.resolve("noseparator").unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert!(err
            .data
            .as_ref()
            .unwrap()
            .as_str()
            .unwrap()
            .contains("noseparator"));
    }

    #[test]
    fn unknown_service_and_method_are_not_found() {
        let interface = Interface::new();
        interface.register(echo_service("rpc")).unwrap();

        let err = interface.resolve("nope.Foo").unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert!(err.data.as_ref().unwrap().as_str().unwrap().contains("nope.Foo"));

        let err = interface.resolve("rpc.Missing").unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert!(err
            .data
            .as_ref()
            .unwrap()
            .as_str()
            .unwrap()
            .contains("rpc.Missing"));
    }
}
