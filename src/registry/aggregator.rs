//! Per-game shared timeline
//!
//! One [`StreamAggregator`] exists per game id. Ingestion actors push the
//! header and steps they decode; delivery actors read the timeline at their
//! own pace through [`StreamAggregator::stream_to`].
//!
//! Several submitters may describe the same game. The first one to reach a
//! tick records it; later submissions for that tick must compare equal or
//! the game is marked desynced.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::config::AggregatorConfig;
use crate::delivery::{DeliveryActor, DeliveryKind};
use crate::error::{DivergenceError, Result};
use crate::protocol::{ReplayHeader, ReplayStep};
use crate::storage::GameInfo;

/// What `push_step` did with a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Appended to the timeline
    Recorded,
    /// Same tick already recorded with identical operations
    Duplicate,
    /// Ignored (terminal step with several submitters, or game complete)
    Dropped,
}

/// A recorded step and the ingestion actor that supplied it
#[derive(Debug)]
struct RecordedStep {
    step: ReplayStep,
    source: u64,
}

/// Mutable per-game state
struct Timeline {
    header: Option<Arc<ReplayHeader>>,
    header_bytes: Option<Bytes>,
    steps: Vec<RecordedStep>,
    complete: bool,
    desynced: bool,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    ingestion: HashSet<u64>,
    delivery: HashMap<u64, DeliveryKind>,
    max_watchers: u32,
}

impl Timeline {
    fn current_tick(&self) -> u32 {
        self.steps.len() as u32
    }

    fn mark_complete(&mut self) {
        self.complete = true;
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }
}

/// Statistics for one aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorStats {
    pub game_id: u64,
    pub current_tick: u32,
    pub complete: bool,
    pub desynced: bool,
    pub ingestion_count: usize,
    pub delivery_count: usize,
    pub max_watchers: u32,
}

/// Shared, validated, append-only timeline of one game
pub struct StreamAggregator {
    game_id: u64,
    config: AggregatorConfig,
    timeline: Mutex<Timeline>,
    /// Flips to true once the header is known or the game ended without one
    ready: watch::Sender<bool>,
}

impl StreamAggregator {
    pub fn new(game_id: u64, config: AggregatorConfig) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            game_id,
            config,
            timeline: Mutex::new(Timeline {
                header: None,
                header_bytes: None,
                steps: Vec::new(),
                complete: false,
                desynced: false,
                started_at: Utc::now(),
                ended_at: None,
                ingestion: HashSet::new(),
                delivery: HashMap::new(),
                max_watchers: 0,
            }),
            ready,
        }
    }

    pub fn game_id(&self) -> u64 {
        self.game_id
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    // Never held across an await
    fn timeline(&self) -> MutexGuard<'_, Timeline> {
        self.timeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_tick(&self) -> u32 {
        self.timeline().current_tick()
    }

    pub fn is_complete(&self) -> bool {
        self.timeline().complete
    }

    pub fn is_desynced(&self) -> bool {
        self.timeline().desynced
    }

    pub fn header(&self) -> Option<Arc<ReplayHeader>> {
        self.timeline().header.clone()
    }

    /// Recorded step for a tick (1-based)
    pub fn step(&self, tick: u32) -> Option<ReplayStep> {
        let timeline = self.timeline();
        let index = (tick as usize).checked_sub(1)?;
        timeline.steps.get(index).map(|r| r.step.clone())
    }

    pub fn ingestion_count(&self) -> usize {
        self.timeline().ingestion.len()
    }

    pub fn delivery_count(&self) -> usize {
        self.timeline().delivery.len()
    }

    pub fn stats(&self) -> AggregatorStats {
        let timeline = self.timeline();
        AggregatorStats {
            game_id: self.game_id,
            current_tick: timeline.current_tick(),
            complete: timeline.complete,
            desynced: timeline.desynced,
            ingestion_count: timeline.ingestion.len(),
            delivery_count: timeline.delivery.len(),
            max_watchers: timeline.max_watchers,
        }
    }

    /// Metadata snapshot for sidecars and the archive
    pub fn game_info(&self) -> GameInfo {
        let timeline = self.timeline();
        let mut info = GameInfo::new(self.game_id);
        info.started_at = timeline.started_at;
        info.ended_at = timeline.ended_at;
        info.complete = timeline.complete;
        info.desynced = timeline.desynced;
        info.ticks = timeline.current_tick();
        info.max_watchers = timeline.max_watchers;
        info
    }

    /// Register an ingestion actor until the returned guard drops
    pub fn attach_ingestion(self: &Arc<Self>, id: u64) -> IngestionGuard {
        let count = {
            let mut timeline = self.timeline();
            timeline.ingestion.insert(id);
            timeline.ingestion.len()
        };
        tracing::debug!(
            game_id = self.game_id,
            session_id = id,
            submitters = count,
            "Ingestion attached"
        );
        IngestionGuard {
            aggregator: Arc::clone(self),
            id,
        }
    }

    fn detach_ingestion(&self, id: u64) {
        let ended = {
            let mut timeline = self.timeline();
            timeline.ingestion.remove(&id);
            let orphaned = timeline.ingestion.is_empty() && !timeline.complete;
            if orphaned {
                timeline.mark_complete();
            }
            orphaned
        };
        tracing::debug!(game_id = self.game_id, session_id = id, "Ingestion detached");

        if ended {
            tracing::info!(
                game_id = self.game_id,
                "All submitters left without end of game, ending stream"
            );
            self.ready.send_replace(true);
        }
    }

    fn attach_delivery(&self, id: u64, kind: DeliveryKind) -> DeliveryGuard<'_> {
        {
            let mut timeline = self.timeline();
            timeline.delivery.insert(id, kind);
            let watchers = timeline
                .delivery
                .values()
                .filter(|k| **k == DeliveryKind::Live)
                .count() as u32;
            timeline.max_watchers = timeline.max_watchers.max(watchers);
        }
        DeliveryGuard {
            aggregator: self,
            id,
        }
    }

    fn detach_delivery(&self, id: u64) {
        self.timeline().delivery.remove(&id);
    }

    /// Record the header, or check it against the recorded one
    pub fn push_header(
        &self,
        header: ReplayHeader,
        raw: Bytes,
    ) -> std::result::Result<(), DivergenceError> {
        let mut timeline = self.timeline();
        if let Some(existing) = &timeline.header_bytes {
            if *existing == raw {
                return Ok(());
            }
            timeline.desynced = true;
            tracing::warn!(game_id = self.game_id, "Header difference between submitters");
            return Err(DivergenceError::Header);
        }

        tracing::info!(
            game_id = self.game_id,
            map = %header.map_path,
            version = %header.version,
            "Replay header received"
        );
        timeline.header = Some(Arc::new(header));
        timeline.header_bytes = Some(raw);
        drop(timeline);
        self.ready.send_replace(true);
        Ok(())
    }

    /// Record a step, or check it against the recorded one
    pub fn push_step(
        &self,
        source: u64,
        step: ReplayStep,
    ) -> std::result::Result<StepOutcome, DivergenceError> {
        let mut timeline = self.timeline();

        // A second submitter's result must not end a shared game early
        if step.is_terminal && timeline.ingestion.len() > 1 {
            tracing::debug!(
                game_id = self.game_id,
                session_id = source,
                tick = step.tick,
                "Dropping end of game from one of several submitters"
            );
            return Ok(StepOutcome::Dropped);
        }

        let current = timeline.current_tick();
        if step.tick == 0 || step.tick > current + 1 {
            return Err(DivergenceError::TickGap {
                expected: current + 1,
                got: step.tick,
            });
        }

        if step.tick <= current {
            let recorded = &timeline.steps[(step.tick - 1) as usize];
            if recorded.step == step {
                return Ok(StepOutcome::Duplicate);
            }

            tracing::warn!(
                game_id = self.game_id,
                tick = step.tick,
                recorded_from = recorded.source,
                session_id = source,
                "Step difference between submitters"
            );
            for row in recorded.step.diff(&step) {
                tracing::warn!(game_id = self.game_id, tick = step.tick, "{}", row);
            }
            timeline.desynced = true;
            return Err(DivergenceError::Step { tick: step.tick });
        }

        if timeline.complete {
            return Ok(StepOutcome::Dropped);
        }

        let tick = step.tick;
        let terminal = step.is_terminal;
        timeline.steps.push(RecordedStep { step, source });

        if tick % 100 == 0 {
            tracing::debug!(game_id = self.game_id, tick = tick, "Current step");
        }

        if terminal {
            timeline.mark_complete();
            tracing::info!(
                game_id = self.game_id,
                ticks = tick,
                viewers = timeline.delivery.len(),
                "Stream finished"
            );
            drop(timeline);
            self.ready.send_replace(true);
        }

        Ok(StepOutcome::Recorded)
    }

    /// Mark the game ended; idempotent
    pub fn end(&self) {
        self.timeline().mark_complete();
        self.ready.send_replace(true);
    }

    /// Wait for the header; `None` if the game ended without one
    async fn wait_for_header(&self) -> Option<Bytes> {
        let mut ready = self.ready.subscribe();
        if ready.wait_for(|ready| *ready).await.is_err() {
            return None;
        }
        self.timeline().header_bytes.clone()
    }

    /// Steps the actor has not received yet, and whether this is the last batch
    fn pending_steps(&self, sent_tick: i64, kind: DeliveryKind) -> (Vec<Bytes>, bool) {
        let timeline = self.timeline();
        let current = timeline.steps.len();
        let target = match kind {
            DeliveryKind::Live if !timeline.complete => {
                current.saturating_sub(self.config.live_delay_steps as usize)
            }
            _ => current,
        };
        let from = sent_tick.max(0) as usize;

        let batch = if from < target {
            timeline.steps[from..target]
                .iter()
                .map(|r| r.step.to_bytes())
                .collect()
        } else {
            Vec::new()
        };

        (batch, timeline.complete)
    }

    /// Stream the timeline to a delivery actor until the game completes
    ///
    /// Sends the header once, then every step in order, trailing the head by
    /// the live delay for live viewers of an unfinished game. The actor is
    /// detached however this returns.
    pub async fn stream_to<D: DeliveryActor>(&self, actor: &mut D) -> Result<()> {
        let _guard = self.attach_delivery(actor.id(), actor.kind());

        let Some(header) = self.wait_for_header().await else {
            tracing::info!(
                game_id = self.game_id,
                session_id = actor.id(),
                "Stream ended before a header arrived"
            );
            return Ok(());
        };

        tracing::info!(
            game_id = self.game_id,
            session_id = actor.id(),
            kind = ?actor.kind(),
            peers = self.delivery_count(),
            "Streaming started"
        );

        actor.send(header).await?;

        loop {
            let (batch, last_run) = self.pending_steps(actor.sent_tick(), actor.kind());
            for data in batch {
                actor.send(data).await?;
            }

            if last_run {
                actor.finish().await?;
                break;
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }

        tracing::info!(
            game_id = self.game_id,
            session_id = actor.id(),
            sent = actor.sent_tick(),
            "Streaming finished"
        );

        Ok(())
    }
}

impl std::fmt::Display for StreamAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header = self.header();
        let map = header.as_ref().map_or("?", |h| h.map_path.as_str());
        let name = header.as_ref().and_then(|h| h.map_name()).unwrap_or("?");
        write!(f, "Stream({}, {} ({}))", self.game_id, map, name)
    }
}

/// Keeps an ingestion actor attached; ends an orphaned game on drop
pub struct IngestionGuard {
    aggregator: Arc<StreamAggregator>,
    id: u64,
}

impl IngestionGuard {
    pub fn aggregator(&self) -> &Arc<StreamAggregator> {
        &self.aggregator
    }
}

impl Drop for IngestionGuard {
    fn drop(&mut self) {
        self.aggregator.detach_ingestion(self.id);
    }
}

/// Keeps a delivery actor attached for the duration of `stream_to`
struct DeliveryGuard<'a> {
    aggregator: &'a StreamAggregator,
    id: u64,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.aggregator.detach_delivery(self.id);
    }
}
