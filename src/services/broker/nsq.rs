use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Broker, BrokerError};

/// nsqd's HTTP publish endpoint. A publish is acknowledged when nsqd answers
/// 2xx with the body `OK`.
#[derive(Clone)]
pub struct NsqHttpBroker {
    client: Client,
    base_url: String,
}

impl NsqHttpBroker {
    /// `address` may be `host:port` or a full `http(s)://` URL.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: normalize_address(address),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn pub_url(&self) -> String {
        format!("{}/pub", self.base_url)
    }
}

fn normalize_address(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

#[async_trait]
impl Broker for NsqHttpBroker {
    fn name(&self) -> &str {
        "nsq"
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let response = self
            .client
            .post(self.pub_url())
            .query(&[("topic", topic)])
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BrokerError::Timeout
                } else {
                    BrokerError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        if status.is_success() && body.trim() == "OK" {
            Ok(())
        } else {
            Err(BrokerError::Rejected {
                status: status.as_u16(),
                body: body.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn address_gets_scheme() {
        assert_eq!(normalize_address("127.0.0.1:4151"), "http://127.0.0.1:4151");
        assert_eq!(normalize_address("http://nsq:4151/"), "http://nsq:4151");
        assert_eq!(normalize_address("https://nsq.example"), "https://nsq.example");
    }

    /// Answers a single HTTP request with the given status line and body and
    /// hands back the raw request text.
    async fn one_shot_server(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut request = Vec::new();
            // Read until the full body announced by Content-Length has arrived.
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let len = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + len {
                        break;
                    }
                }
            }
            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            sock.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (addr, handle)
    }

    #[tokio::test]
    async fn ok_body_is_an_acknowledgment() {
        let (addr, server) = one_shot_server("200 OK", "OK").await;
        let broker = NsqHttpBroker::new(&addr, Duration::from_secs(5)).unwrap();

        broker.publish("varcollect", b"{\"a\":1}".to_vec()).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /pub?topic=varcollect HTTP/1.1"));
        assert!(request.ends_with("{\"a\":1}"));
    }

    #[tokio::test]
    async fn error_status_is_a_rejection() {
        let (addr, server) = one_shot_server("400 Bad Request", "E_BAD_TOPIC").await;
        let broker = NsqHttpBroker::new(&addr, Duration::from_secs(5)).unwrap();

        let err = broker.publish("bad topic", b"x".to_vec()).await.unwrap_err();
        assert_eq!(
            err,
            BrokerError::Rejected {
                status: 400,
                body: "E_BAD_TOPIC".to_string()
            }
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_broker_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let broker = NsqHttpBroker::new(&addr, Duration::from_secs(2)).unwrap();
        let err = broker.handshake("shake", b"hello".to_vec()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Transport(_) | BrokerError::Timeout));
    }
}
