use std::sync::Arc;

use relay_config::shared::{FailurePolicy, StageConfig};
use tracing::{debug, error, info, warn};

use crate::concurrency::signal::SignalRx;
use crate::error::{RelayError, RelayResult};
use crate::notifications::{NotificationTx, StageNotification};
use crate::plugins::{Applier, Extractor, Filter};
use crate::progress::{StageProgressTracker, TaskPhase};
use crate::stage::schedule::{Disposition, Schedule};
use crate::types::{DataEvent, Event, TaskId};

/// How the worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    /// The loop left through a normal boundary (cancellation check, stop
    /// event, policy-driven stop); partial batched work is committed.
    Finished,
    /// The worker was woken out of a blocking call; uncommitted work is
    /// rolled back.
    Interrupted,
}

/// What the commit-boundary decision table requires before applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundaryAction {
    /// No boundary: batch normally.
    Batch,
    /// Commit previously batched work before touching this event.
    CommitPrior,
}

/// One worker of a stage: runs the extract, filter, apply loop on its own
/// task until cancelled, told to quit, or fatally failed.
///
/// Each worker owns its private extractor, filter chain, and applier; the
/// only state shared with siblings is the stage progress tracker.
pub(crate) struct StageTask {
    stage_name: String,
    task_id: TaskId,
    config: StageConfig,
    tracker: Arc<StageProgressTracker>,
    schedule: Schedule,
    extractor: Box<dyn Extractor>,
    filters: Vec<Box<dyn Filter>>,
    applier: Box<dyn Applier>,
    notifications: NotificationTx,
    wake: SignalRx,
    /// Events applied into the current block, committed together.
    block_event_count: u64,
    /// A fragmented transaction has started and not yet seen its last fragment.
    fragmented_txn_open: bool,
    /// Service recorded at the most recent first fragment; `None` until one
    /// has been seen.
    last_first_frag_service: Option<Option<String>>,
}

impl StageTask {
    #[expect(clippy::too_many_arguments)]
    pub(crate) fn new(
        stage_name: String,
        task_id: TaskId,
        config: StageConfig,
        tracker: Arc<StageProgressTracker>,
        schedule: Schedule,
        extractor: Box<dyn Extractor>,
        filters: Vec<Box<dyn Filter>>,
        mut applier: Box<dyn Applier>,
        notifications: NotificationTx,
        wake: SignalRx,
    ) -> Self {
        applier.set_task_id(task_id);
        Self {
            stage_name,
            task_id,
            config,
            tracker,
            schedule,
            extractor,
            filters,
            applier,
            notifications,
            wake,
            block_event_count: 0,
            fragmented_txn_open: false,
            last_first_frag_service: None,
        }
    }

    /// Runs the worker to completion, then deregisters it from its group.
    pub(crate) async fn run(mut self) {
        info!("starting stage task");
        self.tracker.task_begin(self.task_id);

        // A wake observed here would predate this worker; start clean.
        self.wake.mark_unchanged();

        self.run_task().await;

        info!("terminating processing for stage task");
        if let Some(last) = self.tracker.last_processed_event(self.task_id) {
            info!(
                seqno = last.seqno,
                event_id = %last.event_id,
                "last successfully processed event prior to termination"
            );
        }
        info!(
            event_count = self.tracker.task_event_count(self.task_id),
            "stage task event count"
        );

        self.release_plugins().await;
        self.schedule.task_end();
    }

    async fn run_task(&mut self) {
        if self.config.auto_sync {
            let _ = self.notifications.send(StageNotification::InSequence {
                stage: self.stage_name.clone(),
                task_id: self.task_id,
            });
        }

        if let Err(err) = self.seek_start_position().await {
            self.dispatch_error_at_last_position(err);
            return;
        }

        match self.process_loop().await {
            Ok(LoopExit::Finished) => {
                // Flush whatever the last block left uncommitted so it
                // becomes persistent.
                if let Err(err) = self.applier.commit().await {
                    self.dispatch_error_at_last_position(err);
                }
            }
            Ok(LoopExit::Interrupted) => {
                // Roll back to release locks and clear partial work.
                if let Err(err) = self.applier.rollback().await {
                    warn!(error = %err, "failed to roll back after interruption");
                }
            }
            Err(err) => {
                // An unexpected error occurred; it is fatal to this worker
                // but does not affect siblings.
                error!(error = %err, "stage task failed");
                self.dispatch_error_at_last_position(err);
                if let Err(rollback_err) = self.applier.rollback().await {
                    warn!(error = %rollback_err, "failed to roll back after task failure");
                }
            }
        }
    }

    /// The extract, advise, filter, apply loop.
    ///
    /// Policy-gated failures (extraction, application) are handled in place;
    /// anything else propagates as fatal.
    async fn process_loop(&mut self) -> RelayResult<LoopExit> {
        let mut current_event: Option<DataEvent> = None;
        let mut first_filtered: Option<DataEvent> = None;
        let mut last_filtered: Option<DataEvent> = None;

        loop {
            // Report the event finished by the previous iteration, unless a
            // filtered span is still accumulating: spanned events are
            // reported through their aggregate position update instead.
            if first_filtered.is_none() {
                if let Some(event) = current_event.take() {
                    self.schedule.set_last_processed_event(event);
                    // Commit the position when no block is open. An open
                    // fragmented transaction counts as an open block even
                    // outside block-commit mode.
                    if self.block_event_count == 0 && !self.fragmented_txn_open {
                        self.applier.commit().await?;
                    }
                }
            }

            if self.schedule.is_cancelled() {
                info!("stage task has been cancelled");
                return Ok(LoopExit::Finished);
            }

            // Fetch the next event. The extractor may block; racing it
            // against the wake signal keeps the worker responsive to
            // cancellation.
            self.tracker.begin_interval(self.task_id, TaskPhase::Extract);
            let extractor = &mut self.extractor;
            let wake = &mut self.wake;
            let outcome = tokio::select! {
                extracted = extractor.extract() => Some(extracted),
                _ = wake.changed() => None,
            };
            self.tracker.end_interval(self.task_id);

            let extracted = match outcome {
                None => {
                    if self.schedule.is_cancelled() {
                        info!("stage task interrupted while waiting for an event");
                    } else {
                        warn!("received unexpected wake in stage task");
                    }
                    return Ok(LoopExit::Interrupted);
                }
                Some(Err(err)) => {
                    error!(error = %err, "event extraction failed");
                    match self.config.extractor_failure_policy {
                        FailurePolicy::Stop => {
                            self.dispatch_error_at_last_position(err);
                            return Ok(LoopExit::Finished);
                        }
                        FailurePolicy::Warn => continue,
                    }
                }
                Some(Ok(None)) => {
                    debug!("no event extracted, retrying");
                    current_event = None;
                    continue;
                }
                Some(Ok(Some(event))) => event,
            };

            // Ask the schedule what to do with it.
            match self.schedule.advise(&extracted) {
                Disposition::Proceed => {}
                Disposition::ContinueNext => {
                    self.update_position(&extracted, false).await?;
                    current_event = None;
                    continue;
                }
                Disposition::ContinueNextCommit => {
                    self.update_position(&extracted, true).await?;
                    current_event = None;
                    continue;
                }
                Disposition::Quit => {
                    debug!("quitting task processing loop");
                    self.update_position(&extracted, false).await?;
                    return Ok(LoopExit::Finished);
                }
            }

            // Only data events proceed past the schedule.
            let Event::Data(event) = extracted else {
                continue;
            };
            debug!(
                seqno = event.seqno,
                fragno = event.fragno,
                "extracted event"
            );
            current_event = Some(event.clone());

            // Run the filter chain in registration order.
            self.tracker.begin_interval(self.task_id, TaskPhase::Filter);
            let mut filtered = Some(event);
            for filter in &mut self.filters {
                let input = filtered.take().expect("filter input must be present");
                match filter.filter(input).await {
                    Ok(Some(output)) => filtered = Some(output),
                    Ok(None) => {
                        debug!("event discarded by filter");
                        break;
                    }
                    Err(err) => {
                        self.tracker.end_interval(self.task_id);
                        return Err(err);
                    }
                }
            }
            self.tracker.end_interval(self.task_id);

            let Some(event) = filtered else {
                // Dropped: extend the pending filtered span and move on.
                let dropped = current_event
                    .clone()
                    .expect("dropped event was recorded as current");
                if first_filtered.is_none() {
                    first_filtered = Some(dropped.clone());
                }
                last_filtered = Some(dropped);
                continue;
            };

            // The event passed. Close out a pending filtered span first so
            // position tracking covers the dropped range. The span is kept
            // open on failure so a later event retries it.
            if let Some(first) = first_filtered.clone() {
                let last = last_filtered
                    .clone()
                    .expect("span has both endpoints once opened");
                let range = DataEvent::filtered_range(&first, &last);
                debug!(
                    from_seqno = first.seqno,
                    to_seqno = last.seqno,
                    "applying filtered span"
                );
                self.tracker.begin_interval(self.task_id, TaskPhase::Apply);
                let result = self.applier.apply(&range, true, false, true).await;
                self.tracker.end_interval(self.task_id);
                match result {
                    Ok(()) => {
                        first_filtered = None;
                        last_filtered = None;
                    }
                    Err(err) => {
                        if self.handle_apply_failure(&event, err) {
                            return Ok(LoopExit::Finished);
                        }
                        continue;
                    }
                }
            }

            // Honor transaction and service boundaries before this event.
            if self.commit_boundary(&event) == BoundaryAction::CommitPrior
                && self.block_event_count > 0
            {
                debug!(seqno = event.seqno, "committing prior work at boundary");
                self.tracker.begin_interval(self.task_id, TaskPhase::Apply);
                let result = self.applier.commit().await;
                self.tracker.end_interval(self.task_id);
                self.block_event_count = 0;
                if let Err(err) = result {
                    if self.handle_apply_failure(&event, err) {
                        return Ok(LoopExit::Finished);
                    }
                    continue;
                }
            }

            // A transaction flagged to roll back is discarded at its final
            // fragment instead of being committed.
            if event.is_rollback() && event.last_frag {
                debug!(seqno = event.seqno, "rolling back flagged transaction");
                self.tracker.begin_interval(self.task_id, TaskPhase::Apply);
                let result = self.applier.apply(&event, false, true, false).await;
                self.tracker.end_interval(self.task_id);
                self.note_transaction_state(&event);
                if let Err(err) = result {
                    if self.handle_apply_failure(&event, err) {
                        return Ok(LoopExit::Finished);
                    }
                }
                continue;
            }

            // Commit when:
            // 1. block commit is not used and this is the last fragment of
            //    the transaction, or
            // 2. block commit is used, this is the last fragment, and the
            //    block is full or the extractor has nothing buffered, or
            // 3. the event must not share a block with others.
            let force_solo = event.is_unsafe_for_block_commit();
            let mut do_commit = false;
            if self.config.uses_block_commit() && !force_solo {
                self.block_event_count += 1;
                if event.last_frag
                    && (self.block_event_count >= self.config.block_commit_rows
                        || !self.extractor.has_more_events().await)
                {
                    do_commit = true;
                    self.block_event_count = 0;
                }
            } else {
                do_commit = event.last_frag;
            }

            debug!(
                seqno = event.seqno,
                fragno = event.fragno,
                do_commit,
                "applying event"
            );
            self.tracker.begin_interval(self.task_id, TaskPhase::Apply);
            let result = self.applier.apply(&event, do_commit, false, false).await;
            self.tracker.end_interval(self.task_id);
            self.note_transaction_state(&event);
            if let Err(err) = result {
                if self.handle_apply_failure(&event, err) {
                    return Ok(LoopExit::Finished);
                }
                continue;
            }
        }
    }

    /// Priority-ordered decision table for forcing a commit of prior batched
    /// work before the given event.
    fn commit_boundary(&self, event: &DataEvent) -> BoundaryAction {
        // 1. An event unsafe for block commit never shares a block.
        if event.is_unsafe_for_block_commit() {
            return BoundaryAction::CommitPrior;
        }

        // 2. A new transaction beginning while a fragmented transaction is
        //    still open: commit the prior work first.
        if event.fragno == 0 && self.fragmented_txn_open {
            return BoundaryAction::CommitPrior;
        }

        // 3. A transaction that will roll back is isolated from prior work
        //    at its first fragment, so the later rollback cannot drag
        //    completed transactions down with it.
        if event.fragno == 0 && event.is_rollback() {
            return BoundaryAction::CommitPrior;
        }

        // 4. Service identity changing between consecutive first fragments:
        //    never mix services inside one block.
        if event.fragno == 0 {
            if let Some(previous) = &self.last_first_frag_service {
                if previous.as_deref() != event.service() {
                    return BoundaryAction::CommitPrior;
                }
            }
        }

        BoundaryAction::Batch
    }

    /// Records fragment and service state used by the boundary decisions.
    fn note_transaction_state(&mut self, event: &DataEvent) {
        self.fragmented_txn_open = !event.last_frag;
        if event.fragno == 0 {
            self.last_first_frag_service = Some(event.service().map(str::to_string));
        }
    }

    /// Updates the applier's position for an event that is not applied.
    ///
    /// Position-only updates participate in block counting so a long run of
    /// skips or sync markers still commits at block boundaries.
    async fn update_position(&mut self, event: &Event, do_commit: bool) -> RelayResult<()> {
        let Some(position) = event.position() else {
            debug!("unable to update position: event carries none");
            return Ok(());
        };

        let mut do_commit = do_commit;
        if self.config.uses_block_commit() {
            self.block_event_count += 1;
            if self.block_event_count >= self.config.block_commit_rows
                || !self.extractor.has_more_events().await
            {
                do_commit = true;
                self.block_event_count = 0;
            }
        } else {
            do_commit = true;
        }

        debug!(seqno = position.seqno, do_commit, "updating position");
        self.tracker.begin_interval(self.task_id, TaskPhase::Apply);
        let result = self.applier.apply(position, do_commit, false, true).await;
        self.tracker.end_interval(self.task_id);
        result
    }

    /// Repositions the extractor at the durable resume point before the loop
    /// starts.
    async fn seek_start_position(&mut self) -> RelayResult<()> {
        if self.config.sync_position_with_extractor {
            if let Some(last) = self.applier.last_event().await? {
                info!(
                    event_id = %last.event_id,
                    "positioning extractor at applier position"
                );
                return self.extractor.seek(&last.event_id).await;
            }
        }

        if let Some(event_id) = self.config.initial_event_id.clone() {
            info!(%event_id, "positioning extractor at configured event id");
            return self.extractor.seek(&event_id).await;
        }

        Ok(())
    }

    /// Applies the failure policy to an apply-path error.
    ///
    /// Returns true when the worker must stop.
    fn handle_apply_failure(&self, event: &DataEvent, err: RelayError) -> bool {
        error!(
            seqno = event.seqno,
            fragno = event.fragno,
            error = %err,
            "event application failed"
        );
        match self.config.applier_failure_policy {
            FailurePolicy::Stop => {
                let _ = self.notifications.send(StageNotification::Error {
                    stage: self.stage_name.clone(),
                    task_id: self.task_id,
                    seqno: Some(event.seqno),
                    event_id: Some(event.event_id.clone()),
                    error: err,
                });
                true
            }
            FailurePolicy::Warn => false,
        }
    }

    /// Dispatches a fatal error notification carrying the last known position.
    fn dispatch_error_at_last_position(&self, err: RelayError) {
        let last = self.tracker.last_processed_event(self.task_id);
        let _ = self.notifications.send(StageNotification::Error {
            stage: self.stage_name.clone(),
            task_id: self.task_id,
            seqno: last.as_ref().map(|event| event.seqno),
            event_id: last.map(|event| event.event_id),
            error: err,
        });
    }

    async fn release_plugins(&mut self) {
        if let Err(err) = self.extractor.release().await {
            warn!(error = %err, "failed to release extractor");
        }
        for filter in &mut self.filters {
            if let Err(err) = filter.release().await {
                warn!(error = %err, "failed to release filter");
            }
        }
        if let Err(err) = self.applier.release().await {
            warn!(error = %err, "failed to release applier");
        }
    }
}
