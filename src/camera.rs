use anyhow::Result;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::frame_cache::{CameraStream, FrameSink};

/// Camera stream backed by an HTTP snapshot endpoint.
///
/// While started, a background thread fetches the snapshot URL at a fixed
/// interval and pushes every successful body to the frame sink. Failed
/// fetches are logged and skipped; the next tick simply tries again.
pub struct HttpSnapshotCamera {
    url: String,
    interval: Duration,
    timeout: Duration,
    /// Run flag of the current polling thread, if any.
    running: Mutex<Option<Arc<AtomicBool>>>,
}

impl HttpSnapshotCamera {
    /// Create a new camera for the given snapshot URL.
    ///
    /// # Arguments
    ///
    /// * `url` - Endpoint returning a single JPEG image per request
    /// * `interval` - Delay between consecutive fetches
    /// * `timeout` - Per-request timeout
    pub fn new(url: String, interval: Duration, timeout: Duration) -> Self {
        Self {
            url,
            interval,
            timeout,
            running: Mutex::new(None),
        }
    }

    /// Make a single snapshot request.
    fn attempt_fetch(client: &reqwest::blocking::Client, url: &str) -> Result<Vec<u8>> {
        let response = client.get(url).send()?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "HTTP request failed with status: {}",
                response.status()
            ));
        }

        let data = response.bytes()?;
        Ok(data.to_vec())
    }
}

impl CameraStream for HttpSnapshotCamera {
    fn start(&self, sink: FrameSink) -> Result<()> {
        let mut current = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if current.is_some() {
            return Ok(());
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;
        let url = self.url.clone();
        let interval = self.interval;
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        thread::Builder::new()
            .name("camera".to_string())
            .spawn(move || {
                info!("Camera polling started for {}", url);
                while running.load(Ordering::SeqCst) {
                    match Self::attempt_fetch(&client, &url) {
                        Ok(data) if !data.is_empty() => {
                            debug!("Fetched {} byte frame", data.len());
                            sink(data);
                        }
                        Ok(_) => warn!("Camera returned an empty frame"),
                        Err(e) => warn!("Failed to fetch camera frame: {}", e),
                    }
                    thread::sleep(interval);
                }
                info!("Camera polling stopped");
            })?;

        *current = Some(flag);
        Ok(())
    }

    /// The polling thread exits after its current fetch; it is not joined.
    fn stop(&self) {
        if let Some(flag) = self.running.lock().unwrap_or_else(|e| e.into_inner()).take() {
            flag.store(false, Ordering::SeqCst);
        }
    }
}
