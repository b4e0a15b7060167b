//! Analysis run lifecycle.
//!
//! Every trigger allocates a new run id strictly greater than all previous
//! ones and supersedes the run it replaces. A run walks its batches one at a
//! time; before merging any batch result it re-checks that it is still the
//! latest run and stops silently if not. Each unit sent produces exactly one
//! entry: the model's explanation when the response parsed and named it,
//! otherwise the fallback.

use super::batcher::{batch_units, render_batch_request, AnalysisBatch};
use super::extractor::extract_units;
use super::{AnalysisMode, ExplanationEntry, SourceUnit};
use crate::error::LlmError;
use crate::llm::parse::{parse_explanations, ParsedExplanation};
use crate::llm::{LanguageModel, Usage};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type RunId = u64;

/// Unit name used when a selection contains no recognizable function.
pub const SELECTION_UNIT_NAME: &str = "selection";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Superseded,
    Done,
}

/// What caused a run to start (logged with the run).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    ContentSettled,
    ModeSwitch,
    FileSwitch,
    Selection,
    Manual,
}

/// Accumulated output of one run.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub id: RunId,
    pub mode: AnalysisMode,
    pub file_name: String,
    pub status: RunStatus,
    total_units: usize,
    entries: Vec<ExplanationEntry>,
}

impl AnalysisRun {
    pub fn new(id: RunId, mode: AnalysisMode, file_name: impl Into<String>, total_units: usize) -> Self {
        Self {
            id,
            mode,
            file_name: file_name.into(),
            status: RunStatus::Pending,
            total_units,
            entries: Vec::with_capacity(total_units),
        }
    }

    pub fn entries(&self) -> &[ExplanationEntry] {
        &self.entries
    }

    /// All units have an entry.
    pub fn is_complete(&self) -> bool {
        self.entries.len() >= self.total_units
    }

    /// Merge one batch's outcome and return the entries it added.
    ///
    /// Parsed explanations are matched to units by name, each used at most
    /// once, so duplicate names in one batch still map one-to-one. Units the
    /// response did not cover, and every unit of a failed batch, get the
    /// fallback.
    pub fn merge_batch(
        &mut self,
        batch: &AnalysisBatch,
        outcome: Result<Vec<ParsedExplanation>, String>,
    ) -> Vec<ExplanationEntry> {
        if self.status == RunStatus::Pending {
            self.status = RunStatus::Running;
        }

        let added: Vec<ExplanationEntry> = match outcome {
            Ok(parsed) => {
                let mut remaining: Vec<Option<ParsedExplanation>> =
                    parsed.into_iter().map(Some).collect();
                batch
                    .units
                    .iter()
                    .map(|unit| {
                        remaining
                            .iter_mut()
                            .find(|slot| {
                                slot.as_ref()
                                    .is_some_and(|p| p.unit_name.trim() == unit.name)
                            })
                            .and_then(Option::take)
                            .filter(|p| !p.explanation.is_empty())
                            .map(|p| ExplanationEntry {
                                unit_name: unit.name.clone(),
                                text: p.explanation,
                                is_fallback: false,
                            })
                            .unwrap_or_else(|| ExplanationEntry::fallback(&unit.name))
                    })
                    .collect()
            }
            Err(_) => batch
                .units
                .iter()
                .map(|unit| ExplanationEntry::fallback(&unit.name))
                .collect(),
        };

        self.entries.extend(added.iter().cloned());
        added
    }

    fn finish(&mut self) {
        self.status = RunStatus::Done;
    }
}

/// Outcome of starting a run, returned synchronously to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStart {
    /// No units were found; the run is already terminal
    NothingToAnalyze {
        run_id: RunId,
        file_name: String,
        mode: AnalysisMode,
    },
    Started {
        run_id: RunId,
        file_name: String,
        mode: AnalysisMode,
        total_units: usize,
        total_batches: usize,
    },
}

impl RunStart {
    pub fn run_id(&self) -> RunId {
        match self {
            RunStart::NothingToAnalyze { run_id, .. } | RunStart::Started { run_id, .. } => *run_id,
        }
    }
}

/// Messages from a run's background task
#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    BatchMerged {
        run_id: RunId,
        batch_index: usize,
        total_batches: usize,
        entries: Vec<ExplanationEntry>,
        /// User-facing status when the batch call itself failed
        notice: Option<String>,
        usage: Option<Usage>,
    },
    Done {
        run_id: RunId,
    },
}

impl AnalysisEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            AnalysisEvent::BatchMerged { run_id, .. } | AnalysisEvent::Done { run_id } => *run_id,
        }
    }
}

/// Cancellation view of one run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub id: RunId,
    token: CancellationToken,
}

impl RunHandle {
    pub fn is_superseded(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct CurrentRun {
    id: RunId,
    token: CancellationToken,
    status: RunStatus,
}

/// Owns the run counter and the newest run.
pub struct AnalysisRunController {
    model: Arc<dyn LanguageModel>,
    batch_size: usize,
    next_id: RunId,
    latest: Arc<AtomicU64>,
    current: Option<CurrentRun>,
    tx: mpsc::UnboundedSender<AnalysisEvent>,
}

impl AnalysisRunController {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        batch_size: usize,
    ) -> (Self, mpsc::UnboundedReceiver<AnalysisEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Self {
            model,
            batch_size: batch_size.max(1),
            next_id: 0,
            latest: Arc::new(AtomicU64::new(0)),
            current: None,
            tx,
        };
        (controller, rx)
    }

    /// Id of the newest run, if any run was ever started.
    pub fn latest_run(&self) -> Option<RunId> {
        self.current.as_ref().map(|c| c.id)
    }

    /// Status of the newest run.
    pub fn current_status(&self) -> Option<RunStatus> {
        self.current.as_ref().map(|c| c.status)
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self.current_status(),
            Some(RunStatus::Pending | RunStatus::Running)
        )
    }

    pub fn handle(&self) -> Option<RunHandle> {
        self.current.as_ref().map(|c| RunHandle {
            id: c.id,
            token: c.token.clone(),
        })
    }

    /// Analyze a whole file.
    pub fn start(
        &mut self,
        file_name: &str,
        content: &str,
        mode: AnalysisMode,
        trigger: RunTrigger,
    ) -> RunStart {
        self.start_units(file_name, extract_units(content), mode, trigger)
    }

    /// Analyze a selected snippet. A snippet with no recognizable function is
    /// analyzed as a single unit.
    pub fn start_selection(&mut self, file_name: &str, snippet: &str, mode: AnalysisMode) -> RunStart {
        let mut units = extract_units(snippet);
        let trimmed = snippet.trim();
        if units.is_empty() && !trimmed.is_empty() {
            units.push(SourceUnit::new(SELECTION_UNIT_NAME, trimmed));
        }
        self.start_units(file_name, units, mode, RunTrigger::Selection)
    }

    /// Supersede the in-flight run without starting another.
    pub fn cancel(&mut self) -> Option<RunId> {
        let id = self.current.as_ref().map(|c| c.id);
        self.supersede_current();
        id
    }

    /// Record a worker event; returns false when the event is stale.
    pub fn observe(&mut self, event: &AnalysisEvent) -> bool {
        let Some(current) = self.current.as_mut() else {
            return false;
        };
        if current.id != event.run_id() || current.status == RunStatus::Superseded {
            debug!(run_id = event.run_id(), "dropping stale analysis event");
            return false;
        }
        if matches!(event, AnalysisEvent::Done { .. }) {
            current.status = RunStatus::Done;
        }
        true
    }

    fn supersede_current(&mut self) {
        if let Some(current) = self.current.as_mut() {
            if matches!(current.status, RunStatus::Pending | RunStatus::Running) {
                current.token.cancel();
                current.status = RunStatus::Superseded;
                debug!(run_id = current.id, "analysis run superseded");
            }
        }
    }

    fn start_units(
        &mut self,
        file_name: &str,
        units: Vec<SourceUnit>,
        mode: AnalysisMode,
        trigger: RunTrigger,
    ) -> RunStart {
        self.supersede_current();
        self.next_id += 1;
        let id = self.next_id;
        self.latest.store(id, Ordering::SeqCst);

        let token = CancellationToken::new();
        if units.is_empty() {
            info!(run_id = id, file = file_name, ?trigger, "nothing to analyze");
            self.current = Some(CurrentRun {
                id,
                token,
                status: RunStatus::Done,
            });
            return RunStart::NothingToAnalyze {
                run_id: id,
                file_name: file_name.to_string(),
                mode,
            };
        }

        let batches = batch_units(&units, self.batch_size);
        let total_units = units.len();
        let total_batches = batches.len();
        info!(
            run_id = id,
            file = file_name,
            mode = mode.label(),
            ?trigger,
            units = total_units,
            batches = total_batches,
            "analysis run started"
        );

        self.current = Some(CurrentRun {
            id,
            token: token.clone(),
            status: RunStatus::Running,
        });

        let ctx = RunContext {
            id,
            mode,
            file_name: file_name.to_string(),
            model: Arc::clone(&self.model),
            token,
            latest: Arc::clone(&self.latest),
            tx: self.tx.clone(),
        };
        spawn_run(ctx, batches);

        RunStart::Started {
            run_id: id,
            file_name: file_name.to_string(),
            mode,
            total_units,
            total_batches,
        }
    }
}

impl Drop for AnalysisRunController {
    fn drop(&mut self) {
        self.supersede_current();
    }
}

struct RunContext {
    id: RunId,
    mode: AnalysisMode,
    file_name: String,
    model: Arc<dyn LanguageModel>,
    token: CancellationToken,
    latest: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<AnalysisEvent>,
}

impl RunContext {
    fn is_stale(&self) -> bool {
        self.token.is_cancelled() || self.latest.load(Ordering::SeqCst) != self.id
    }
}

fn spawn_run(ctx: RunContext, batches: Vec<AnalysisBatch>) {
    let id = ctx.id;
    let tx = ctx.tx.clone();
    tokio::spawn(async move {
        if AssertUnwindSafe(drive_run(ctx, batches))
            .catch_unwind()
            .await
            .is_err()
        {
            warn!(run_id = id, "analysis run crashed unexpectedly");
            let _ = tx.send(AnalysisEvent::Done { run_id: id });
        }
    });
}

/// User-facing status for a failed batch call. Malformed responses are
/// recovered per unit and get no notice.
fn batch_notice(err: &LlmError) -> Option<String> {
    match err {
        LlmError::MissingCredential => Some(
            "No API key configured, so functions show a fallback explanation. Run 'pairpad setup'."
                .to_string(),
        ),
        LlmError::Cancelled | LlmError::Malformed(_) => None,
        _ => Some("Couldn't reach the model; some functions show a fallback explanation.".to_string()),
    }
}

async fn drive_run(ctx: RunContext, batches: Vec<AnalysisBatch>) {
    let total_units = batches.iter().map(|b| b.units.len()).sum();
    let total_batches = batches.len();
    let mut run = AnalysisRun::new(ctx.id, ctx.mode, ctx.file_name.clone(), total_units);

    for batch in &batches {
        if ctx.is_stale() {
            debug!(run_id = ctx.id, batch = batch.index, "run superseded before batch");
            return;
        }

        let request = render_batch_request(batch, ctx.mode, &ctx.file_name);
        let result = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => Err(LlmError::Cancelled),
            result = ctx.model.complete(request) => result,
        };

        if ctx.is_stale() {
            debug!(run_id = ctx.id, batch = batch.index, "discarding stale batch result");
            return;
        }

        let (outcome, notice, usage) = match result {
            Ok(response) => (parse_explanations(&response.content), None, response.usage),
            Err(err) => {
                warn!(run_id = ctx.id, batch = batch.index, error = %err, "batch request failed");
                let notice = batch_notice(&err);
                (Err(err.to_string()), notice, None)
            }
        };
        if let Err(reason) = &outcome {
            warn!(
                run_id = ctx.id,
                batch = batch.index,
                units = batch.units.len(),
                reason = %reason,
                "batch fell back to placeholder explanations"
            );
        }

        let entries = run.merge_batch(batch, outcome);
        let _ = ctx.tx.send(AnalysisEvent::BatchMerged {
            run_id: ctx.id,
            batch_index: batch.index,
            total_batches,
            entries,
            notice,
            usage,
        });
    }

    if ctx.is_stale() {
        return;
    }
    run.finish();
    info!(
        run_id = ctx.id,
        entries = run.entries().len(),
        complete = run.is_complete(),
        "analysis run done"
    );
    let _ = ctx.tx.send(AnalysisEvent::Done { run_id: ctx.id });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FALLBACK_EXPLANATION;
    use crate::testing::{wait_for_calls, FakeModel};

    const TWO_FUNCTIONS: &str = "def alpha():\n    return 1\n\ndef beta():\n    return 2\n";

    fn parsed(name: &str, text: &str) -> ParsedExplanation {
        ParsedExplanation {
            unit_name: name.to_string(),
            explanation: text.to_string(),
        }
    }

    fn batch(names: &[&str]) -> AnalysisBatch {
        AnalysisBatch {
            index: 0,
            units: names
                .iter()
                .map(|n| SourceUnit::new(*n, format!("def {}(): pass", n)))
                .collect(),
        }
    }

    fn functions(prefix: &str, n: usize) -> String {
        (0..n)
            .map(|i| format!("def {}{}():\n    return {}\n", prefix, i, i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn collect_until_done(
        rx: &mut mpsc::UnboundedReceiver<AnalysisEvent>,
        run_id: RunId,
    ) -> Vec<AnalysisEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = matches!(event, AnalysisEvent::Done { run_id: id } if id == run_id);
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    fn merged_entries(events: &[AnalysisEvent]) -> Vec<ExplanationEntry> {
        events
            .iter()
            .filter_map(|e| match e {
                AnalysisEvent::BatchMerged { entries, .. } => Some(entries.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_merge_matches_by_name_and_falls_back_for_missing() {
        let mut run = AnalysisRun::new(1, AnalysisMode::Teacher, "a.py", 3);
        let added = run.merge_batch(
            &batch(&["a", "b", "c"]),
            Ok(vec![parsed("c", "Cee"), parsed("a", "Ay"), parsed("zzz", "??")]),
        );
        assert_eq!(added.len(), 3);
        assert_eq!(added[0].text, "Ay");
        assert!(added[1].is_fallback);
        assert_eq!(added[1].text, FALLBACK_EXPLANATION);
        assert_eq!(added[2].text, "Cee");
        assert!(run.is_complete());
        assert_eq!(run.status, RunStatus::Running);
    }

    #[test]
    fn test_merge_failed_batch_falls_back_for_every_unit() {
        let mut run = AnalysisRun::new(1, AnalysisMode::Reviewer, "a.py", 2);
        let added = run.merge_batch(&batch(&["a", "b"]), Err("bad json".into()));
        assert!(added.iter().all(|e| e.is_fallback));
        assert_eq!(run.entries().len(), 2);
    }

    #[test]
    fn test_merge_duplicate_names_map_one_to_one() {
        let mut run = AnalysisRun::new(1, AnalysisMode::Teacher, "a.py", 3);
        let added = run.merge_batch(
            &batch(&["init", "init", "init"]),
            Ok(vec![parsed("init", "first"), parsed("init", "second")]),
        );
        let texts: Vec<_> = added.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", FALLBACK_EXPLANATION]);
    }

    #[test]
    fn test_later_batches_append() {
        let mut run = AnalysisRun::new(1, AnalysisMode::Teacher, "a.py", 2);
        run.merge_batch(&batch(&["a"]), Ok(vec![parsed("a", "one")]));
        run.merge_batch(&batch(&["a"]), Ok(vec![parsed("a", "two")]));
        let texts: Vec<_> = run.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_two_functions_one_batch_one_call() {
        let model = Arc::new(FakeModel::explaining());
        let (mut controller, mut rx) = AnalysisRunController::new(model.clone(), 5);

        let start = controller.start("a.py", TWO_FUNCTIONS, AnalysisMode::Teacher, RunTrigger::Manual);
        assert!(matches!(
            start,
            RunStart::Started { total_units: 2, total_batches: 1, .. }
        ));

        let events = collect_until_done(&mut rx, start.run_id()).await;
        for event in &events {
            assert!(controller.observe(event));
        }
        let entries = merged_entries(&events);
        let names: Vec<_> = entries.iter().map(|e| e.unit_name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert!(entries.iter().all(|e| !e.is_fallback));
        assert_eq!(model.call_count(), 1);
        assert_eq!(controller.current_status(), Some(RunStatus::Done));
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_nothing_to_analyze_makes_no_calls() {
        let model = Arc::new(FakeModel::explaining());
        let (mut controller, _rx) = AnalysisRunController::new(model.clone(), 5);
        let start = controller.start("a.py", "x = 1\n", AnalysisMode::Teacher, RunTrigger::Manual);
        assert!(matches!(start, RunStart::NothingToAnalyze { .. }));
        assert_eq!(controller.current_status(), Some(RunStatus::Done));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_batches_are_requested_one_at_a_time() {
        let (fake, gate) = FakeModel::explaining().gated();
        let model = Arc::new(fake);
        let (mut controller, mut rx) = AnalysisRunController::new(model.clone(), 2);

        let start = controller.start("a.py", &functions("f", 5), AnalysisMode::Teacher, RunTrigger::Manual);
        wait_for_calls(&model, 1).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(model.call_count(), 1);

        gate.add_permits(3);
        let events = collect_until_done(&mut rx, start.run_id()).await;
        assert_eq!(model.call_count(), 3);
        assert_eq!(merged_entries(&events).len(), 5);
    }

    #[tokio::test]
    async fn test_newer_run_supersedes_in_flight_run() {
        let (fake, gate) = FakeModel::explaining().gated();
        let model = Arc::new(fake);
        let (mut controller, mut rx) = AnalysisRunController::new(model.clone(), 5);

        let first = controller.start("a.py", &functions("old", 2), AnalysisMode::Teacher, RunTrigger::Manual);
        wait_for_calls(&model, 1).await;
        let first_handle = controller.handle().unwrap();

        let second = controller.start("a.py", &functions("new", 2), AnalysisMode::Teacher, RunTrigger::ContentSettled);
        assert!(second.run_id() > first.run_id());
        assert!(first_handle.is_superseded());

        gate.add_permits(5);
        let events = collect_until_done(&mut rx, second.run_id()).await;
        assert!(events.iter().all(|e| e.run_id() == second.run_id()));
        let entries = merged_entries(&events);
        assert!(entries.iter().all(|e| e.unit_name.starts_with("new")));
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_call_yields_fallbacks_and_notice() {
        let model = Arc::new(FakeModel::failing(|| LlmError::MissingCredential));
        let (mut controller, mut rx) = AnalysisRunController::new(model, 5);
        let start = controller.start("a.py", TWO_FUNCTIONS, AnalysisMode::Reviewer, RunTrigger::Manual);

        let events = collect_until_done(&mut rx, start.run_id()).await;
        let entries = merged_entries(&events);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.text == FALLBACK_EXPLANATION));
        let notice = events.iter().find_map(|e| match e {
            AnalysisEvent::BatchMerged { notice, .. } => notice.clone(),
            _ => None,
        });
        assert!(notice.unwrap().contains("API key"));
    }

    #[tokio::test]
    async fn test_malformed_response_falls_back_without_notice() {
        let model = Arc::new(FakeModel::new(|_| Ok("Sorry, I can't help with that.".to_string())));
        let (mut controller, mut rx) = AnalysisRunController::new(model, 5);
        let start = controller.start("a.py", TWO_FUNCTIONS, AnalysisMode::Teacher, RunTrigger::Manual);

        let events = collect_until_done(&mut rx, start.run_id()).await;
        assert!(merged_entries(&events).iter().all(|e| e.is_fallback));
        assert!(events.iter().all(|e| !matches!(
            e,
            AnalysisEvent::BatchMerged { notice: Some(_), .. }
        )));
    }

    #[tokio::test]
    async fn test_selection_without_function_is_single_unit() {
        let model = Arc::new(FakeModel::explaining());
        let (mut controller, mut rx) = AnalysisRunController::new(model, 5);
        let start = controller.start_selection("a.py", "  total = sum(xs)\n", AnalysisMode::Teacher);
        assert!(matches!(start, RunStart::Started { total_units: 1, .. }));

        let events = collect_until_done(&mut rx, start.run_id()).await;
        let entries = merged_entries(&events);
        assert_eq!(entries[0].unit_name, SELECTION_UNIT_NAME);
    }

    #[tokio::test]
    async fn test_cancel_marks_run_superseded_and_drops_events() {
        let (fake, gate) = FakeModel::explaining().gated();
        let model = Arc::new(fake);
        let (mut controller, mut rx) = AnalysisRunController::new(model.clone(), 5);
        let start = controller.start("a.py", TWO_FUNCTIONS, AnalysisMode::Teacher, RunTrigger::Manual);
        wait_for_calls(&model, 1).await;

        assert_eq!(controller.cancel(), Some(start.run_id()));
        assert_eq!(controller.current_status(), Some(RunStatus::Superseded));
        gate.add_permits(1);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(rx.try_recv().is_err());
    }
}
