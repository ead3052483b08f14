use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Local HTTP upstream answering every request through `handler(path_and_query)`
pub struct TestServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&str) -> (StatusCode, String) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let hits = Arc::new(AtomicUsize::new(0));

        let make_service = {
            let hits = hits.clone();
            make_service_fn(move |_connection: &AddrStream| {
                let handler = handler.clone();
                let hits = hits.clone();
                let service = service_fn(move |request: Request<Body>| {
                    let handler = handler.clone();
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        let path = request
                            .uri()
                            .path_and_query()
                            .map(|path| path.as_str().to_owned())
                            .unwrap_or_default();
                        let (status, body) = handler(&path);
                        let response = Response::builder()
                            .status(status)
                            .header("Content-Type", "application/json")
                            .body(Body::from(body))
                            .unwrap();
                        Ok::<_, Infallible>(response)
                    }
                });
                async move { Ok::<_, Infallible>(service) }
            })
        };

        let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_service);
        let addr = server.local_addr();
        let handle = tokio::spawn(async move {
            let _ = server.await;
        });

        Self { addr, hits, handle }
    }

    pub fn uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
