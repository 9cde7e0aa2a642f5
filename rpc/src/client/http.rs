//!
//! HTTP transport: JSON-RPC calls and batches as POST bodies, plus raw
//! path access relative to the dialed URL.
//!

use crate::client::{BatchElem, CallFactory, ClientOptions, HttpResponse};
use crate::imports::*;
use crate::message::Message;
use crate::server::HttpMethod;
use http::header::{ACCEPT, CONTENT_TYPE};

pub struct HttpClient {
    base: reqwest::Url,
    http: reqwest::Client,
    factory: Option<CallFactory>,
}

impl HttpClient {
    pub(crate) fn dial(base: reqwest::Url, options: ClientOptions) -> Result<HttpClient> {
        let http = reqwest::Client::builder()
            .default_headers(options.headers)
            .build()?;
        let factory = options.jsonrpc.map(|opt| CallFactory::new(opt.encoding));
        Ok(HttpClient {
            base,
            http,
            factory,
        })
    }

    fn factory(&self) -> Result<&CallFactory> {
        self.factory.as_ref().ok_or(Error::NoJsonRpc)
    }

    pub async fn call<T, P>(&self, method: &str, args: Option<&P>) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let factory = self.factory()?;
        let request = factory.new_call(method, args)?;
        let body = self.post_json(serde_json::to_vec(&request)?).await?;
        let reply: Message = serde_json::from_slice(&body)?;
        factory.decode_result(&reply)
    }

    pub async fn batch_call(&self, batch: &mut [BatchElem]) -> Result<()> {
        let factory = self.factory()?;

        let mut requests = Vec::with_capacity(batch.len());
        let mut by_id: AHashMap<String, usize> = AHashMap::with_capacity(batch.len());
        for (index, elem) in batch.iter().enumerate() {
            let request = factory.new_call(&elem.method, elem.args.as_ref())?;
            if let Some(id) = &request.id {
                by_id.insert(id.get().to_string(), index);
            }
            requests.push(request);
        }

        let body = self.post_json(serde_json::to_vec(&requests)?).await?;
        let replies: Vec<Message> = serde_json::from_slice(&body)?;

        for reply in replies {
            let Some(index) = reply
                .id
                .as_ref()
                .and_then(|id| by_id.get(id.get()))
                .copied()
            else {
                warn!("batch response with unknown id dropped");
                continue;
            };
            let elem = &mut batch[index];
            if let Some(err) = reply.error {
                elem.error = Some(Error::Rpc(err));
            } else if let Some(result) = reply.result {
                elem.result = Some(result);
            } else {
                elem.error = Some(Error::NoResult);
            }
        }
        Ok(())
    }

    pub async fn raw_http(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse> {
        // raw paths are relative to the dialed URL, by concatenation
        let url = format!("{}{path}", self.base.as_str().trim_end_matches('/'));
        let request = match method {
            HttpMethod::Get => self.http.get(url),
            HttpMethod::Post => self.http.post(url).body(body.unwrap_or_default()),
        };
        let response = request.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        Ok(HttpResponse {
            status,
            body: bytes.to_vec(),
        })
    }

    async fn post_json(&self, body: Vec<u8>) -> Result<Vec<u8>> {
        let response = self
            .http
            .post(self.base.clone())
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).to_string(),
            });
        }
        Ok(bytes.to_vec())
    }
}
