// SPDX-License-Identifier: GPL-3.0-only

//! Callback thread hosting all camera device events
//!
//! Every [`CameraEvent`] a backend produces is queued on one channel and
//! handled serially on a dedicated thread, so device and session objects are
//! only ever touched from that thread. Stopping posts [`CameraEvent::Quit`]
//! behind any queued events and joins the thread.

use super::{CameraEvent, DeviceCallback};
use crate::errors::{CameraError, CameraResult};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Action returned by the event handler to control the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Keep handling events
    Continue,
    /// Exit the loop
    Stop,
}

/// Create the event queue shared by a callback thread and its backends
pub fn event_channel() -> (DeviceCallback, Receiver<CameraEvent>) {
    let (tx, rx) = mpsc::channel();
    (DeviceCallback::new(tx), rx)
}

/// Handle to a running callback thread
///
/// # Example
///
/// ```ignore
/// let (callback, events) = event_channel();
/// let mut thread = CallbackThread::start("camera-events", callback, events, |event| {
///     match event {
///         CameraEvent::Quit => LoopAction::Stop,
///         _ => LoopAction::Continue,
///     }
/// })?;
///
/// // Later, tear down and wait
/// thread.stop();
/// ```
pub struct CallbackThread {
    thread_handle: Option<JoinHandle<()>>,
    callback: DeviceCallback,
    name: String,
}

impl CallbackThread {
    /// Spawn the thread
    ///
    /// `handler` is called for every event until it returns
    /// [`LoopAction::Stop`]. Events still queued at that point are handed to
    /// the handler once more (its result ignored) so late devices and
    /// sessions can be closed; frames among them are released.
    pub fn start<F>(
        name: &str,
        callback: DeviceCallback,
        events: Receiver<CameraEvent>,
        mut handler: F,
    ) -> CameraResult<Self>
    where
        F: FnMut(CameraEvent) -> LoopAction + Send + 'static,
    {
        let name_clone = name.to_string();

        info!(name = %name, "Starting callback thread");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %name_clone, "Callback thread started");

                while let Ok(event) = events.recv() {
                    if handler(event) == LoopAction::Stop {
                        debug!(name = %name_clone, "Handler requested stop");
                        break;
                    }
                }

                for event in events.try_iter() {
                    let _ = handler(event);
                }

                info!(name = %name_clone, "Callback thread exiting");
            })
            .map_err(|e| CameraError::CallbackContext(format!("spawn {}: {}", name, e)))?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            callback,
            name: name.to_string(),
        })
    }

    /// Callback handed to backends
    pub fn callback(&self) -> DeviceCallback {
        self.callback.clone()
    }

    /// Check if the thread is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Queue a quit request behind pending events (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting callback thread stop");
        self.callback.send(CameraEvent::Quit);
    }

    /// Request stop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending quit
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "Waiting for callback thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Callback thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Callback thread finished");
            }
        }
    }
}

impl Drop for CallbackThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CallbackThread dropped, stopping");
            self.stop();
        }
    }
}
