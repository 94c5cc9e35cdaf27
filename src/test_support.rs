use axum::Router;
use tokio::net::TcpListener;

/// Serve `router` on an ephemeral local port, returns the base URL
pub async fn spawn_server(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = axum::Server::from_tcp(listener.into_std().unwrap())
        .unwrap()
        .serve(router.into_make_service());
    tokio::spawn(server);

    format!("http://{}", addr)
}
