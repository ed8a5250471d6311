//! Screens that keep themselves current.
//!
//! A [`LiveFeed`] subscribes to the change feed, loads its screen once, and
//! reloads it whenever the invalidation strategy asks for it. Events that
//! arrive together are folded into a single reload. The latest snapshot is
//! published on a watch channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use enleve_shared::backend::{Backend, ChangeEvent, ChangeFilter, Subscription};
use enleve_shared::constants::TABLE_ATTENDANCE;

use crate::commands::board::{Board, BoardSnapshot};
use crate::commands::dashboard::{Dashboard, DashboardSnapshot};
use crate::error::Result;
use crate::invalidation::{FullRefetch, Invalidation, InvalidationStrategy};

/// A screen whose whole content can be reloaded.
#[async_trait]
pub trait Screen: Send + Sync + 'static {
    type Snapshot: Clone + Send + Sync + 'static;

    async fn reload(&self) -> Result<Self::Snapshot>;

    /// Called for every event before the reload decision.
    fn on_change(&self, _event: &ChangeEvent) {}
}

#[async_trait]
impl Screen for Board {
    type Snapshot = BoardSnapshot;

    async fn reload(&self) -> Result<BoardSnapshot> {
        self.load().await
    }
}

#[async_trait]
impl Screen for Dashboard {
    type Snapshot = DashboardSnapshot;

    async fn reload(&self) -> Result<DashboardSnapshot> {
        self.load().await
    }

    fn on_change(&self, event: &ChangeEvent) {
        self.announce(event);
    }
}

pub struct LiveFeed<T> {
    rx: watch::Receiver<Option<T>>,
    task: JoinHandle<()>,
}

pub type BoardFeed = LiveFeed<BoardSnapshot>;
pub type DashboardFeed = LiveFeed<DashboardSnapshot>;

impl<T: Clone + Send + Sync + 'static> LiveFeed<T> {
    /// Subscribe, then start the reload loop. The subscription is in place
    /// before the first load, so no change between the two is missed.
    pub async fn start<S>(
        screen: Arc<S>,
        backend: &dyn Backend,
        filter: ChangeFilter,
        strategy: Box<dyn InvalidationStrategy>,
    ) -> Result<Self>
    where
        S: Screen<Snapshot = T>,
    {
        let subscription = backend.subscribe(filter).await?;
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(run(screen, subscription, strategy, tx));
        Ok(Self { rx, task })
    }

    /// Latest successfully loaded snapshot.
    pub fn latest(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<T>> {
        self.rx.clone()
    }

    /// Wait for the next published snapshot. `None` once the feed stopped.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }
}

impl BoardFeed {
    pub async fn board(board: Arc<Board>, backend: &dyn Backend) -> Result<Self> {
        Self::start(
            board,
            backend,
            ChangeFilter::table(TABLE_ATTENDANCE),
            Box::new(FullRefetch::new(&[TABLE_ATTENDANCE])),
        )
        .await
    }
}

impl DashboardFeed {
    pub async fn dashboard(dashboard: Arc<Dashboard>, backend: &dyn Backend) -> Result<Self> {
        Self::start(
            dashboard,
            backend,
            ChangeFilter::table(TABLE_ATTENDANCE),
            Box::new(FullRefetch::new(&[TABLE_ATTENDANCE])),
        )
        .await
    }
}

impl<T> Drop for LiveFeed<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<S: Screen>(
    screen: Arc<S>,
    mut subscription: Subscription,
    strategy: Box<dyn InvalidationStrategy>,
    tx: watch::Sender<Option<S::Snapshot>>,
) {
    publish(screen.as_ref(), &tx).await;

    while let Some(first) = subscription.recv().await {
        let mut reload = false;
        let mut pending = Some(first);
        while let Some(event) = pending {
            screen.on_change(&event);
            reload |= strategy.decide(&event) == Invalidation::ReloadAll;
            pending = subscription.try_recv();
        }
        if reload {
            publish(screen.as_ref(), &tx).await;
        }
    }
    debug!("change feed closed, live screen stopped");
}

async fn publish<S: Screen>(screen: &S, tx: &watch::Sender<Option<S::Snapshot>>) {
    match screen.reload().await {
        Ok(snapshot) => {
            tx.send_replace(Some(snapshot));
        }
        // The screen already told the user; keep showing the previous data.
        Err(e) => warn!(error = %e, "live reload failed"),
    }
}
