use tonic::{Request, Response, Status};

use super::pb;
use super::pb::auth_service_server::AuthService;

pub struct AuthServiceImpl;

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn ping(&self, _request: Request<pb::AuthServicePingRequest>) -> Result<Response<pb::AuthServicePingResponse>, Status> {
        Ok(Response::new(pb::AuthServicePingResponse { version: env!("CARGO_PKG_VERSION").to_string() }))
    }

    /// The bearer-token interceptor has already authenticated the caller by
    /// the time this runs; there is no token-to-label reverse lookup wired
    /// through here, so a unix-socket (implicitly trusted) caller reports
    /// itself as local and a TCP caller reports the generic "remote" label.
    async fn who_am_i(&self, request: Request<pb::AuthServiceWhoAmIRequest>) -> Result<Response<pb::AuthServiceWhoAmIResponse>, Status> {
        let local = request.metadata().get("authorization").is_none();
        let label = if local { "local" } else { "remote" };
        Ok(Response::new(pb::AuthServiceWhoAmIResponse { label: label.to_string(), local }))
    }
}
