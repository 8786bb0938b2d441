use tokio::task::JoinHandle;

/// Handle for an observer registered with
/// [`SessionController::observe`](super::SessionController::observe).
///
/// Delivery stops when the handle is released or dropped.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// Stop delivering events to the observer.
    pub fn release(mut self) {
        self.stop();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
