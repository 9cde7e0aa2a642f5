//!
//! Binary RPC transport: a thin wrapper over a tonic channel. Method
//! registration and stubs belong to the host application; this client only
//! owns the connection.
//!

use crate::imports::*;
use tonic::transport::{Channel as GrpcChannel, Endpoint};

pub struct GrpcClient {
    channel: GrpcChannel,
}

impl GrpcClient {
    pub(crate) async fn dial(url: &reqwest::Url) -> Result<GrpcClient> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(format!("missing host in {url}")))?;
        let port = url
            .port()
            .ok_or_else(|| Error::InvalidUrl(format!("missing port in {url}")))?;
        let endpoint = Endpoint::from_shared(format!("http://{host}:{port}"))
            .map_err(|err| Error::InvalidUrl(err.to_string()))?;
        let channel = endpoint.connect().await?;
        Ok(GrpcClient { channel })
    }

    /// The underlying channel, for use with generated service stubs.
    pub fn underlying(&self) -> GrpcChannel {
        self.channel.clone()
    }
}
