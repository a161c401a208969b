pub mod mock_server;

use std::sync::Arc;

use kv_remote::testing::{InProcessListener, KvServer, VersionReply};
use kv_remote::{Builder, DatabaseHandle};

use mock_server::MockKv;

/// Spin up a [`MockKv`] behind an in-process transport and return a
/// [`DatabaseHandle`] already dialed into it, plus the server handle so
/// tests can seed tables before issuing requests.
pub async fn harness(version: VersionReply) -> (DatabaseHandle, MockKv) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = MockKv::new(version);

    let svc = KvServer::new(server.clone());
    tokio::spawn(async move {
        let _ = tonic::transport::Server::builder()
            .add_service(svc)
            .serve_with_incoming(tokio_stream::once(Ok::<_, std::io::Error>(server_io)))
            .await;
    });

    let listener = Arc::new(InProcessListener::new(client_io));
    let handle = Builder::path("http://in-memory")
        .in_mem(listener)
        .open()
        .await
        .expect("in-process dial never fails");

    (handle, server)
}
