//! End-to-end runs of ingress → normalizer → simulator over the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use httpmock::prelude::*;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use mailsim::queue::{DeadLetter, OutboundMessage};
use mailsim::{
    router, AppState, Broker, BrokerError, Config, DeliveryHandler, MemoryBroker,
    NormalizeHandler, Publisher, SimulationHandler, SimulationSettings, Simulator, Stage,
    DEAD_LETTER_QUEUE, INBOUND_QUEUE, SIMULATOR_QUEUE,
};

const CF_TOKEN: &str = "pipeline-secret";

struct RunningStage {
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), BrokerError>>,
}

impl RunningStage {
    fn spawn(
        name: &'static str,
        queue: &'static str,
        broker: Arc<MemoryBroker>,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Self {
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            Stage::new(name, queue, 4)
                .run(broker, handler, async move {
                    stopped.await.ok();
                })
                .await
        });
        Self { stop, task }
    }

    async fn stop(self) {
        self.stop.send(()).ok();
        self.task.await.unwrap().unwrap();
    }
}

fn config() -> Config {
    Config::from_lookup(|name| match name {
        "CLOUDFLARE_AUTH_TOKEN" => Some(CF_TOKEN.to_string()),
        "MAILGUN_SIGNING_KEY" => Some("mailgun-key".to_string()),
        _ => None,
    })
}

fn simulator() -> Arc<Simulator> {
    Arc::new(
        Simulator::new(SimulationSettings {
            open_delay_ms: (0, 0),
            click_delay_ms: (0, 0),
            request_timeout_ms: 2000,
            fetch_max_attempts: 1,
            ..Default::default()
        })
        .unwrap(),
    )
}

async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

fn cloudflare_webhook(raw_content: &str) -> Request<Body> {
    let body = serde_json::json!({
        "from": "news@shop.example.com",
        "to": "user+acme@example.com",
        "subject": "Weekly deals",
        "timestamp": "2024-05-01T10:00:00Z",
        "raw_content": raw_content,
    });

    Request::builder()
        .method("POST")
        .uri("/webhooks/cloudflare")
        .header("content-type", "application/json")
        .header("X-Custom-Auth", CF_TOKEN)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_webhook_flows_through_to_open_and_click() {
    let server = MockServer::start();
    let pixel = server.mock(|when, then| {
        when.method(GET).path("/open.gif");
        then.status(200).body("GIF89a");
    });
    let footer = server.mock(|when, then| {
        when.method(GET).path("/footer.png");
        then.status(200);
    });
    let link = server.mock(|when, then| {
        when.method(GET).path("/deal");
        then.status(200).body("<html>deal</html>");
    });

    let raw_content = format!(
        "Message-Id: <deals-42@shop.example.com>\r\n\
         Content-Type: text/html\r\n\
         \r\n\
         <html><body>\
         <div data-scope=\"global\" data-open-rate=\"1\" data-click-rate=\"1\"></div>\
         <img src=\"{}\"><img src=\"{}\">\
         <a href=\"{}\">Deal</a>\
         </body></html>",
        server.url("/open.gif"),
        server.url("/footer.png"),
        server.url("/deal"),
    );

    let broker = Arc::new(MemoryBroker::new());
    let publisher = Publisher::new(broker.clone());

    // A payload that is not an envelope at all, queued ahead of the real one.
    broker
        .publish(
            INBOUND_QUEUE,
            OutboundMessage {
                message_id: "garbage".to_string(),
                body: b"\x00\x01 definitely not json".to_vec(),
            },
        )
        .await
        .unwrap();

    let response = router(AppState::new(config(), publisher.clone()))
        .oneshot(cloudflare_webhook(&raw_content))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let normalizer = RunningStage::spawn(
        "normalizer",
        INBOUND_QUEUE,
        broker.clone(),
        Arc::new(NormalizeHandler::new(publisher.clone())),
    );
    let worker = RunningStage::spawn(
        "simulator",
        SIMULATOR_QUEUE,
        broker.clone(),
        Arc::new(SimulationHandler::new(simulator(), publisher.clone())),
    );

    wait_until("job acknowledged", || broker.stats(SIMULATOR_QUEUE).acked == 1).await;

    normalizer.stop().await;
    worker.stop().await;

    pixel.assert_calls(1);
    footer.assert_calls(0);
    link.assert_calls(1);

    let inbound = broker.stats(INBOUND_QUEUE);
    assert_eq!(inbound.acked, 2);
    assert_eq!(inbound.ready, 0);
    assert_eq!(inbound.unacked, 0);

    let work = broker.stats(SIMULATOR_QUEUE);
    assert_eq!(work.ready, 0);
    assert_eq!(work.unacked, 0);
    assert!(broker.ready_messages(DEAD_LETTER_QUEUE).is_empty());
}

#[tokio::test]
async fn test_rejected_webhook_produces_no_job() {
    let broker = Arc::new(MemoryBroker::new());
    let publisher = Publisher::new(broker.clone());

    let form = "recipient=user%40example.com&timestamp=1700000000&token=t&signature=deadbeef";
    let response = router(AppState::new(config(), publisher.clone()))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/mailgun")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);

    let normalizer = RunningStage::spawn(
        "normalizer",
        INBOUND_QUEUE,
        broker.clone(),
        Arc::new(NormalizeHandler::new(publisher)),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    normalizer.stop().await;

    assert_eq!(broker.stats(INBOUND_QUEUE).acked, 0);
    assert_eq!(broker.stats(SIMULATOR_QUEUE).ready, 0);
}

#[tokio::test]
async fn test_unreachable_links_are_dead_lettered_and_acked() {
    let broker = Arc::new(MemoryBroker::new());
    let publisher = Publisher::new(broker.clone());

    let job = serde_json::json!({
        "message_id": "dead-1",
        "recipient": "user@example.com",
        "source": "mailgun",
        "html": "<div data-scope=\"global\" data-open-rate=\"0\" data-click-rate=\"1\"></div>\
                 <a href=\"http://127.0.0.1:9/nowhere\">x</a>",
    });
    broker
        .publish(
            SIMULATOR_QUEUE,
            OutboundMessage {
                message_id: "dead-1".to_string(),
                body: serde_json::to_vec(&job).unwrap(),
            },
        )
        .await
        .unwrap();
    broker
        .publish(
            SIMULATOR_QUEUE,
            OutboundMessage {
                message_id: "junk".to_string(),
                body: b"[1, 2, 3]".to_vec(),
            },
        )
        .await
        .unwrap();

    let worker = RunningStage::spawn(
        "simulator",
        SIMULATOR_QUEUE,
        broker.clone(),
        Arc::new(SimulationHandler::new(simulator(), publisher)),
    );
    wait_until("both jobs acknowledged", || broker.stats(SIMULATOR_QUEUE).acked == 2).await;
    worker.stop().await;

    let mut letters: Vec<DeadLetter> = broker
        .ready_messages(DEAD_LETTER_QUEUE)
        .iter()
        .map(|body| serde_json::from_slice(body).unwrap())
        .collect();
    letters.sort_by(|a, b| a.message_id.cmp(&b.message_id));

    assert_eq!(letters.len(), 2);
    assert_eq!(letters[0].message_id, "dead-1");
    assert_eq!(letters[0].reason, "fetch_failed");
    assert_eq!(letters[0].failed_urls, vec!["http://127.0.0.1:9/nowhere".to_string()]);
    assert_eq!(letters[1].message_id, "junk");
    assert_eq!(letters[1].reason, "undecodable_job");
}
