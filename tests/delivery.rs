use anyhow::Result;
use print_notify::alerts::{WebhookPayload, WebhookResponse};
use print_notify::error::{DeliveryError, NotifyError, RenderError};
use print_notify::frame_cache::FrameSink;
use print_notify::messages::{MessageTemplates, Render};
use print_notify::queue::{FrameSource, notification_queue};
use print_notify::status::PercentMode;
use print_notify::{
    AlertService, CameraFrame, CameraStream, EventKind, FrameCache, GcodeState, NormalizedStatus,
    NotificationEvent, StatusNormalizer, StatusRecord, WebhookClient, Worker,
};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
struct Post {
    url: String,
    content: String,
    attachment: Option<Vec<u8>>,
}

/// Records every post; answers per URL with a status or a network error.
#[derive(Clone, Default)]
struct FakeClient {
    posts: Arc<Mutex<Vec<Post>>>,
    answers: HashMap<String, Option<u16>>,
}

impl FakeClient {
    fn answering(answers: &[(&str, Option<u16>)]) -> Self {
        Self {
            posts: Arc::default(),
            answers: answers
                .iter()
                .map(|(url, status)| (url.to_string(), *status))
                .collect(),
        }
    }

    fn posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }
}

impl WebhookClient for FakeClient {
    fn post(&self, url: &str, payload: &WebhookPayload<'_>) -> Result<WebhookResponse> {
        self.posts.lock().unwrap().push(Post {
            url: url.to_string(),
            content: payload.content.to_string(),
            attachment: payload.attachment.map(<[u8]>::to_vec),
        });
        match self.answers.get(url).copied().unwrap_or(Some(204)) {
            Some(status) => Ok(WebhookResponse {
                status,
                body: "body".to_string(),
            }),
            None => Err(anyhow::anyhow!("connection refused")),
        }
    }
}

struct FailingRenderer;

impl Render for FailingRenderer {
    fn render(&self, event: EventKind, _status: &NormalizedStatus) -> Result<String, RenderError> {
        Err(RenderError::Unterminated {
            event: event.name().to_string(),
        })
    }
}

/// Camera that delivers one fixed frame as soon as it starts.
#[derive(Default)]
struct StillCamera {
    stops: Mutex<u32>,
}

impl CameraStream for StillCamera {
    fn start(&self, sink: FrameSink) -> Result<()> {
        sink(b"jpeg bytes".to_vec());
        Ok(())
    }

    fn stop(&self) {
        *self.stops.lock().unwrap() += 1;
    }
}

fn event(kind: EventKind, state: &str) -> NotificationEvent {
    let record = StatusRecord {
        gcode_state: Some(GcodeState::from(state)),
        layer_num: Some(12),
        total_layer_num: Some(48),
        mc_remaining_time: Some(90),
        gcode_file: Some("benchy.3mf".to_string()),
        ..Default::default()
    };
    NotificationEvent {
        kind,
        status: StatusNormalizer::new(PercentMode::Layer).normalize(record),
    }
}

fn worker_with(
    client: FakeClient,
    urls: &[&str],
    renderer: Box<dyn Render>,
    frames: Option<FrameSource>,
) -> Worker {
    let (_queue, rx) = notification_queue();
    let alerts = AlertService::new(
        urls.iter().map(|u| u.to_string()).collect(),
        Box::new(client),
        Duration::ZERO,
    );
    Worker::new(rx, renderer, alerts, frames, Arc::new(AtomicBool::new(false)))
}

#[test]
fn test_failing_webhook_does_not_block_others() {
    let client = FakeClient::answering(&[("http://a", None), ("http://b", Some(204))]);
    let alerts = AlertService::new(
        vec!["http://a".to_string(), "http://b".to_string()],
        Box::new(client.clone()),
        Duration::ZERO,
    );

    let outcomes = alerts.deliver("hello", &CameraFrame::default());

    assert_eq!(outcomes.len(), 2);
    assert!(matches!(
        outcomes[0].result,
        Err(DeliveryError::RequestFailed { .. })
    ));
    assert_eq!(outcomes[1].result.as_ref().ok(), Some(&204));
    let urls: Vec<String> = client.posts().into_iter().map(|p| p.url).collect();
    assert_eq!(urls, vec!["http://a", "http://b"]);
}

#[test]
fn test_non_success_status_is_a_failure() {
    let client = FakeClient::answering(&[
        ("http://ok", Some(200)),
        ("http://created", Some(201)),
        ("http://limited", Some(429)),
    ]);
    let alerts = AlertService::new(
        vec![
            "http://ok".to_string(),
            "http://created".to_string(),
            "http://limited".to_string(),
        ],
        Box::new(client),
        Duration::ZERO,
    );

    let outcomes = alerts.deliver("hello", &CameraFrame::default());
    let delivered: Vec<bool> = outcomes.iter().map(|o| o.is_delivered()).collect();
    assert_eq!(delivered, vec![true, false, false]);
    match &outcomes[2].result {
        Err(DeliveryError::Rejected { status, body, .. }) => {
            assert_eq!(*status, 429);
            assert_eq!(body, "body");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn test_frame_is_attached_only_when_present() {
    let client = FakeClient::default();
    let alerts = AlertService::new(
        vec!["http://a".to_string()],
        Box::new(client.clone()),
        Duration::ZERO,
    );

    alerts.deliver("no image", &CameraFrame::default());
    alerts.deliver("with image", &CameraFrame::new(b"jpeg".to_vec()));

    let posts = client.posts();
    assert_eq!(posts[0].attachment, None);
    assert_eq!(posts[1].attachment.as_deref(), Some(&b"jpeg"[..]));
}

#[test]
fn test_worker_renders_and_posts_to_every_webhook() {
    let client = FakeClient::default();
    let worker = worker_with(
        client.clone(),
        &["http://a", "http://b"],
        Box::new(MessageTemplates::default()),
        None,
    );

    let outcomes = worker
        .handle(&event(EventKind::ProgressReport, "RUNNING"))
        .unwrap();

    assert!(outcomes.iter().all(|o| o.is_delivered()));
    let posts = client.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(
        posts[0].content,
        "**Printing benchy:**\nLayer: 12 / 48 *(25 %)*\nREMAINING: 1 hour and 30 minutes"
    );
    assert_eq!(posts[0].content, posts[1].content);
    assert_eq!(posts[0].attachment, None);
}

#[test]
fn test_render_failure_skips_delivery() {
    let client = FakeClient::default();
    let worker = worker_with(client.clone(), &["http://a"], Box::new(FailingRenderer), None);

    let result = worker.handle(&event(EventKind::PrintStart, "RUNNING"));

    assert!(matches!(result, Err(NotifyError::RenderError(_))));
    assert!(client.posts().is_empty());
}

#[test]
fn test_worker_attaches_frame_and_idles_camera_on_finish() {
    let camera = Arc::new(StillCamera::default());
    let cache = FrameCache::new(camera.clone(), Duration::from_millis(50));
    let client = FakeClient::default();
    let worker = worker_with(
        client.clone(),
        &["http://a"],
        Box::new(MessageTemplates::default()),
        Some(FrameSource {
            cache: cache.clone(),
            max_wait: Duration::from_secs(1),
        }),
    );

    worker
        .handle(&event(EventKind::ProgressReport, "RUNNING"))
        .unwrap();
    assert!(cache.is_active());

    worker
        .handle(&event(EventKind::PrintFinish, "FINISH"))
        .unwrap();

    let posts = client.posts();
    assert_eq!(posts[0].attachment.as_deref(), Some(&b"jpeg bytes"[..]));
    assert_eq!(posts[1].attachment.as_deref(), Some(&b"jpeg bytes"[..]));

    std::thread::sleep(Duration::from_millis(300));
    assert!(!cache.is_active());
    assert_eq!(*camera.stops.lock().unwrap(), 1);
}

#[test]
fn test_worker_drains_queue_then_exits() {
    let client = FakeClient::default();
    let (queue, rx) = notification_queue();
    let alerts = AlertService::new(
        vec!["http://a".to_string()],
        Box::new(client.clone()),
        Duration::ZERO,
    );
    let worker = Worker::new(
        rx,
        Box::new(MessageTemplates::default()),
        alerts,
        None,
        Arc::new(AtomicBool::new(false)),
    );

    assert!(queue.is_empty());
    assert!(queue.push(event(EventKind::PrintStart, "RUNNING")));
    assert!(queue.push(event(EventKind::PrintPause, "PAUSE")));
    assert!(queue.push(event(EventKind::PrintResume, "RUNNING")));
    assert_eq!(queue.len(), 3);
    drop(queue);

    worker.spawn().unwrap().join().unwrap();

    let contents: Vec<String> = client.posts().into_iter().map(|p| p.content).collect();
    assert_eq!(contents.len(), 3);
    assert!(contents[0].starts_with("**Printing"));
    assert!(contents[1].starts_with("**Paused"));
    assert!(contents[2].starts_with("**Printing"));
}

#[test]
fn test_worker_stops_on_shutdown_without_draining() {
    let client = FakeClient::default();
    let (queue, rx) = notification_queue();
    let alerts = AlertService::new(
        vec!["http://a".to_string()],
        Box::new(client.clone()),
        Duration::ZERO,
    );
    let shutdown = Arc::new(AtomicBool::new(true));
    let worker = Worker::new(
        rx,
        Box::new(MessageTemplates::default()),
        alerts,
        None,
        shutdown,
    );

    queue.push(event(EventKind::PrintStart, "RUNNING"));
    worker.spawn().unwrap().join().unwrap();

    assert!(client.posts().is_empty());
    assert!(!queue.push(event(EventKind::PrintPause, "PAUSE")));
}

/// Records when each post was made.
#[derive(Clone, Default)]
struct TimedClient {
    sent_at: Arc<Mutex<Vec<Instant>>>,
}

impl WebhookClient for TimedClient {
    fn post(&self, _url: &str, _payload: &WebhookPayload<'_>) -> Result<WebhookResponse> {
        self.sent_at.lock().unwrap().push(Instant::now());
        Ok(WebhookResponse {
            status: 204,
            body: String::new(),
        })
    }
}

#[test]
fn test_posts_are_paced_between_webhooks() {
    let client = TimedClient::default();
    let delay = Duration::from_millis(100);
    let alerts = AlertService::new(
        vec![
            "http://a".to_string(),
            "http://b".to_string(),
            "http://c".to_string(),
        ],
        Box::new(client.clone()),
        delay,
    );

    let started = Instant::now();
    let outcomes = alerts.deliver("hello", &CameraFrame::default());
    let elapsed = started.elapsed();

    assert_eq!(outcomes.len(), 3);
    let sent_at = client.sent_at.lock().unwrap().clone();
    // No wait before the first post, one delay before each later one.
    assert!(sent_at[0].duration_since(started) < delay);
    assert!(sent_at[1].duration_since(sent_at[0]) >= delay);
    assert!(sent_at[2].duration_since(sent_at[1]) >= delay);
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(300));
}
