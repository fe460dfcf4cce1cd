use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info};

use crate::assistant::Assistant;
use crate::gateway::LocalScheduler;

pub(super) struct SchedulerControl {
    stop: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl SchedulerControl {
    pub(super) fn idle() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    pub(super) fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub(super) fn stop_and_join(&mut self) {
        self.stop();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Polls the local job table and feeds due payloads through the same
/// dispatcher the HTTP callback uses. The job id stands in for the delivery id.
pub(super) fn start_local_scheduler_thread(
    scheduler: Arc<LocalScheduler>,
    assistant: Arc<Assistant>,
    poll_interval: Duration,
) -> SchedulerControl {
    let stop = Arc::new(AtomicBool::new(false));
    let handle = {
        let stop = stop.clone();
        thread::spawn(move || {
            let result = scheduler.run_loop(poll_interval, &stop, |payload, job_id| {
                assistant.handle_callback(payload, Some(job_id)).map(|_| ())
            });
            match result {
                Ok(()) => info!("local scheduler stopped"),
                Err(err) => error!("local scheduler exited: {}", err),
            }
        })
    };
    SchedulerControl {
        stop,
        handles: vec![handle],
    }
}
