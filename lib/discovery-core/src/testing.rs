//! In-memory directory for exercising the loop and backend in tests

use crate::directory::{DirectoryClient, EntryStream};
use crate::entry::ServiceEntry;
use crate::error::FetchError;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

type Push = Result<Vec<ServiceEntry>, FetchError>;

pub(crate) struct MemoryDirectory {
    entries: Mutex<Vec<ServiceEntry>>,
    failing: AtomicBool,
    hanging: AtomicBool,
    lists: AtomicUsize,
    pushes: Mutex<Option<mpsc::UnboundedSender<Push>>>,
    watch: Mutex<Option<mpsc::UnboundedReceiver<Push>>>,
}

impl MemoryDirectory {
    pub(crate) fn new(entries: Vec<ServiceEntry>) -> Self {
        let (pushes, watch) = mpsc::unbounded_channel();
        Self {
            entries: Mutex::new(entries),
            failing: AtomicBool::new(false),
            hanging: AtomicBool::new(false),
            lists: AtomicUsize::new(0),
            pushes: Mutex::new(Some(pushes)),
            watch: Mutex::new(Some(watch)),
        }
    }

    /// Replace the entry set and push it to any watcher
    pub(crate) fn publish(&self, entries: Vec<ServiceEntry>) {
        *self.entries.lock().unwrap() = entries.clone();
        self.push(Ok(entries));
    }

    pub(crate) fn push_error(&self, message: &str) {
        self.push(Err(FetchError::Watch(message.to_string())));
    }

    /// End the push stream; later publishes only reach `list()`
    pub(crate) fn close_watch(&self) {
        self.pushes.lock().unwrap().take();
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make `list()` never complete
    pub(crate) fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    fn push(&self, update: Push) {
        if let Some(pushes) = self.pushes.lock().unwrap().as_ref() {
            let _ = pushes.send(update);
        }
    }
}

#[async_trait::async_trait]
impl DirectoryClient for MemoryDirectory {
    async fn list(&self) -> Result<Vec<ServiceEntry>, FetchError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if self.hanging.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Client("directory unavailable".into()));
        }
        Ok(self.entries.lock().unwrap().clone())
    }

    fn watch(&self) -> Option<EntryStream> {
        let receiver = self.watch.lock().unwrap().take()?;
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|update| (update, receiver))
        });
        Some(stream.boxed())
    }
}

pub(crate) fn labelled(name: &str, namespace: &str, target: &str) -> ServiceEntry {
    ServiceEntry::new(name, namespace, target).with_label("fabio", "enabled")
}
