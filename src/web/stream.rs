use actix_web::{web::Bytes, HttpResponse};
use futures::StreamExt;
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::model::FragmentStream;
use crate::web::handlers::FALLBACK_APOLOGY;

/// Written as the last chunk when generation fails after headers were sent.
pub const STREAM_ERROR_MARKER: &str = "\n[ERROR] stream interrupted";

const CHANNEL_CAPACITY: usize = 16;

/// Forwards fragments to the client as `text/plain` chunks. The producer task
/// stops as soon as the client goes away, even while the upstream is idle.
pub fn respond(mut fragments: FragmentStream, request_id: Uuid) -> HttpResponse {
    let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);

    actix_web::rt::spawn(async move {
        let mut sent = 0usize;
        loop {
            let fragment = tokio::select! {
                _ = tx.closed() => {
                    info!("[{}] Client disconnected after {} fragment(s)", request_id, sent);
                    return;
                }
                fragment = fragments.next() => fragment,
            };

            match fragment {
                Some(Ok(text)) if text.is_empty() => continue,
                Some(Ok(text)) => {
                    sent += 1;
                    if tx.send(Bytes::from(text)).await.is_err() {
                        info!("[{}] Client disconnected after {} fragment(s)", request_id, sent);
                        return;
                    }
                }
                Some(Err(e)) => {
                    error!("[{}] Stream failed after {} fragment(s): {}", request_id, sent, e);
                    let _ = tx.send(Bytes::from_static(STREAM_ERROR_MARKER.as_bytes())).await;
                    return;
                }
                None => break,
            }
        }

        if sent == 0 {
            warn!("[{}] Stream ended without any text, sending the apology", request_id);
            let _ = tx.send(Bytes::from_static(FALLBACK_APOLOGY.as_bytes())).await;
            return;
        }

        info!("[{}] Stream finished with {} fragment(s)", request_id, sent);
    });

    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .streaming(ReceiverStream::new(rx).map(Ok::<_, actix_web::Error>))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use actix_web::body::to_bytes;
    use futures::stream;
    use tokio::sync::oneshot;

    use crate::error::UpstreamError;

    // Signals when the upstream stream is dropped.
    struct DropSignal(Option<oneshot::Sender<()>>);

    impl Drop for DropSignal {
        fn drop(&mut self) {
            if let Some(tx) = self.0.take() {
                let _ = tx.send(());
            }
        }
    }

    fn fragments(items: Vec<Result<String, UpstreamError>>) -> FragmentStream {
        stream::iter(items).boxed()
    }

    #[actix_web::test]
    async fn empty_stream_gets_the_apology() {
        let resp = respond(fragments(vec![Ok(String::new())]), Uuid::new_v4());
        let body = to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body, FALLBACK_APOLOGY.as_bytes());
    }

    #[actix_web::test]
    async fn failure_appends_the_marker() {
        let resp = respond(
            fragments(vec![
                Ok("partial".to_string()),
                Err(UpstreamError::RateLimited("quota".into())),
            ]),
            Uuid::new_v4(),
        );
        let body = to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body, format!("partial{STREAM_ERROR_MARKER}").as_bytes());
    }

    #[actix_web::test]
    async fn disconnect_releases_an_idle_upstream() {
        let (dropped_tx, dropped_rx) = oneshot::channel();
        let signal = DropSignal(Some(dropped_tx));
        let idle: FragmentStream = stream::once(async { Ok("partial".to_string()) })
            .chain(stream::pending())
            .map(move |fragment| {
                let _signal = &signal;
                fragment
            })
            .boxed();

        let resp = respond(idle, Uuid::new_v4());
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(resp);

        tokio::time::timeout(Duration::from_secs(1), dropped_rx)
            .await
            .expect("producer kept the upstream stream alive")
            .unwrap();
    }
}
