//! Serializes permission prompts so at most one is visible at a time.
//!
//! The arbitrator runs as a single Tokio task that owns all prompt state. Callers talk
//! to it through [`DialogArbitrator`], a cloneable handle. States:
//!
//! * idle: nothing shown; a submitted request is shown immediately.
//! * showing: one prompt is active with a deadline; new requests wait in a FIFO queue.
//! * settling: a prompt was just dismissed and others are queued; the next one is shown
//!   once the settle delay elapses.
//!
//! Requests for a `(site, kind)` pair that is already showing or queued join that prompt
//! instead of queueing a second one, so one answer settles every identical request.
//!
//! Each active prompt owns the one-shot resolution slots of its waiters. The user's answer
//! and the timeout race to take the prompt; whichever loses finds it gone and does nothing.

use crate::kind::Decision;
use crate::kind::PermissionKind;
use crate::kind::Site;
use crate::protocol::DISMISS_PERMISSION_DIALOG;
use crate::protocol::PermissionDialogResponse;
use crate::protocol::PermissionPrompt;
use crate::protocol::PromptDismissal;
use crate::protocol::SHOW_PERMISSION_DIALOG;
use crate::surface::PromptSurface;
use crate::surface::RequesterHandle;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// A prompt to show. Built per capability request and consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequest {
    pub site: Site,
    pub kind: PermissionKind,
    pub title: String,
    pub description: String,
    pub requester: RequesterHandle,
}

impl PermissionRequest {
    pub fn new(site: Site, kind: PermissionKind, requester: RequesterHandle) -> Self {
        Self {
            title: kind.prompt_title().to_owned(),
            description: kind.prompt_description().to_owned(),
            site,
            kind,
            requester,
        }
    }

    fn prompt(&self) -> PermissionPrompt {
        PermissionPrompt {
            site: self.site.to_string(),
            permission_kind: self.kind,
            title: self.title.clone(),
            description: self.description.clone(),
            requester_id: self.requester,
        }
    }

    fn dismissal(&self) -> PromptDismissal {
        PromptDismissal {
            site: self.site.to_string(),
            permission_kind: self.kind,
        }
    }

    fn is_answered_by(&self, response: &PermissionDialogResponse) -> bool {
        response.permission_kind == self.kind
            && Site::new(&response.site).is_ok_and(|site| site == self.site)
    }
}

/// How a prompt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The user clicked allow or deny (or dismissed the prompt, which counts as deny).
    Answered,
    TimedOut,
    /// The prompt could not be delivered, or the arbitrator shut down.
    Undeliverable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptOutcome {
    pub decision: Decision,
    pub remember: bool,
    pub resolution: Resolution,
}

impl PromptOutcome {
    pub fn answered(granted: bool, remember: bool) -> Self {
        Self {
            decision: Decision::from(granted),
            remember,
            resolution: Resolution::Answered,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            decision: Decision::Denied,
            remember: false,
            resolution: Resolution::TimedOut,
        }
    }

    pub fn undeliverable() -> Self {
        Self {
            decision: Decision::Denied,
            remember: false,
            resolution: Resolution::Undeliverable,
        }
    }

    /// Only explicit answers with "remember" ticked are written to the store.
    pub fn should_persist(&self) -> bool {
        self.remember && self.resolution == Resolution::Answered
    }
}

/// Point-in-time view of the arbitrator, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArbitratorSnapshot {
    pub showing: Option<(Site, PermissionKind)>,
    pub queued: usize,
    pub settling: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbitratorTiming {
    pub prompt_timeout: Duration,
    pub settle_delay: Duration,
}

enum Command {
    Submit(PendingPrompt),
    Respond(PermissionDialogResponse),
    Snapshot(oneshot::Sender<ArbitratorSnapshot>),
}

struct PendingPrompt {
    request: PermissionRequest,
    surface: Arc<dyn PromptSurface>,
    waiters: Vec<oneshot::Sender<PromptOutcome>>,
}

impl PendingPrompt {
    fn is_for(&self, request: &PermissionRequest) -> bool {
        self.request.site == request.site && self.request.kind == request.kind
    }

    fn is_abandoned(&self) -> bool {
        self.waiters.iter().all(oneshot::Sender::is_closed)
    }

    fn resolve(self, outcome: PromptOutcome) {
        for waiter in self.waiters {
            let _ = waiter.send(outcome);
        }
    }
}

struct ActivePrompt {
    pending: PendingPrompt,
    deadline: Instant,
}

/// Handle to the arbitrator task. Dropping every handle stops the task and denies
/// whatever was still pending.
#[derive(Clone)]
pub struct DialogArbitrator {
    commands: mpsc::UnboundedSender<Command>,
}

impl DialogArbitrator {
    /// Starts the arbitrator task. Must be called from within a Tokio runtime.
    pub fn spawn(timing: ArbitratorTiming) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let task = ArbitratorTask {
            timing,
            active: None,
            queue: VecDeque::new(),
            settle_until: None,
        };
        tokio::spawn(task.run(inbox));
        Self { commands }
    }

    /// Shows (or queues) a prompt on `surface` and waits for it to resolve.
    pub async fn arbitrate(
        &self,
        request: PermissionRequest,
        surface: Arc<dyn PromptSurface>,
    ) -> PromptOutcome {
        let (slot, resolution) = oneshot::channel();
        let pending = PendingPrompt {
            request,
            surface,
            waiters: vec![slot],
        };
        if self.commands.send(Command::Submit(pending)).is_err() {
            tracing::warn!("permission arbitrator is not running; denying request");
            return PromptOutcome::undeliverable();
        }

        resolution
            .await
            .unwrap_or_else(|_| PromptOutcome::undeliverable())
    }

    /// Delivers a user answer. Answers that do not match the showing prompt are ignored.
    /// Safe to call from outside the runtime.
    pub fn respond(&self, response: PermissionDialogResponse) {
        if self.commands.send(Command::Respond(response)).is_err() {
            tracing::warn!("permission arbitrator is not running; dropping dialog response");
        }
    }

    pub async fn snapshot(&self) -> ArbitratorSnapshot {
        let (reply, snapshot) = oneshot::channel();
        if self.commands.send(Command::Snapshot(reply)).is_err() {
            return ArbitratorSnapshot::default();
        }
        snapshot.await.unwrap_or_default()
    }
}

struct ArbitratorTask {
    timing: ArbitratorTiming,
    active: Option<ActivePrompt>,
    queue: VecDeque<PendingPrompt>,
    settle_until: Option<Instant>,
}

impl ArbitratorTask {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command>) {
        loop {
            let prompt_deadline = self.active.as_ref().map(|active| active.deadline);
            let settle_deadline = self.settle_until;

            tokio::select! {
                // An answer that lands in the same tick as the deadline wins.
                biased;
                command = inbox.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                () = sleep_until(prompt_deadline) => self.expire_active(),
                () = sleep_until(settle_deadline) => {
                    self.settle_until = None;
                    self.show_next();
                }
            }
        }

        tracing::debug!(
            queued = self.queue.len(),
            "permission arbitrator stopped; pending prompts resolve as denied"
        );
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit(pending) => self.submit(pending),
            Command::Respond(response) => self.answer(response),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn submit(&mut self, mut pending: PendingPrompt) {
        if let Some(existing) = self.matching_prompt(&pending.request) {
            existing.waiters.append(&mut pending.waiters);
            tracing::debug!(
                site = %existing.request.site,
                kind = %existing.request.kind,
                waiters = existing.waiters.len(),
                "joining pending permission prompt"
            );
            return;
        }

        tracing::debug!(
            site = %pending.request.site,
            kind = %pending.request.kind,
            queued = self.queue.len(),
            "permission prompt submitted"
        );
        self.queue.push_back(pending);
        if self.settle_until.is_none() {
            self.show_next();
        }
    }

    fn matching_prompt(&mut self, request: &PermissionRequest) -> Option<&mut PendingPrompt> {
        let active = self
            .active
            .as_mut()
            .map(|active| &mut active.pending)
            .filter(|pending| pending.is_for(request));
        match active {
            Some(pending) => Some(pending),
            None => self.queue.iter_mut().find(|pending| pending.is_for(request)),
        }
    }

    fn show_next(&mut self) {
        while self.active.is_none() {
            let Some(pending) = self.queue.pop_front() else {
                return;
            };

            if pending.is_abandoned() {
                tracing::debug!(
                    site = %pending.request.site,
                    kind = %pending.request.kind,
                    "skipping prompt whose requester went away"
                );
                continue;
            }

            match send_json(
                pending.surface.as_ref(),
                SHOW_PERMISSION_DIALOG,
                &pending.request.prompt(),
            ) {
                Ok(()) => {
                    tracing::info!(
                        site = %pending.request.site,
                        kind = %pending.request.kind,
                        "permission prompt shown"
                    );
                    self.active = Some(ActivePrompt {
                        pending,
                        deadline: Instant::now() + self.timing.prompt_timeout,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        site = %pending.request.site,
                        kind = %pending.request.kind,
                        %error,
                        "failed to show permission prompt; denying"
                    );
                    pending.resolve(PromptOutcome::undeliverable());
                }
            }
        }
    }

    fn answer(&mut self, response: PermissionDialogResponse) {
        let matches = self
            .active
            .as_ref()
            .is_some_and(|active| active.pending.request.is_answered_by(&response));
        if !matches {
            tracing::debug!(
                site = %response.site,
                kind = %response.permission_kind,
                "ignoring dialog response that does not match the showing prompt"
            );
            return;
        }

        let Some(active) = self.active.take() else {
            return;
        };
        tracing::info!(
            site = %active.pending.request.site,
            kind = %active.pending.request.kind,
            granted = response.granted,
            remember = response.remember,
            "permission prompt answered"
        );
        active
            .pending
            .resolve(PromptOutcome::answered(response.granted, response.remember));
        self.after_dismissal();
    }

    fn expire_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let request = &active.pending.request;
        tracing::info!(
            site = %request.site,
            kind = %request.kind,
            "permission prompt timed out; denying"
        );

        if let Err(error) = send_json(
            active.pending.surface.as_ref(),
            DISMISS_PERMISSION_DIALOG,
            &request.dismissal(),
        ) {
            tracing::warn!(%error, "failed to dismiss timed-out permission prompt");
        }
        active.pending.resolve(PromptOutcome::timed_out());
        self.after_dismissal();
    }

    fn after_dismissal(&mut self) {
        if !self.queue.is_empty() {
            self.settle_until = Some(Instant::now() + self.timing.settle_delay);
        }
    }

    fn snapshot(&self) -> ArbitratorSnapshot {
        ArbitratorSnapshot {
            showing: self
                .active
                .as_ref()
                .map(|active| (active.pending.request.site.clone(), active.pending.request.kind)),
            queued: self.queue.len(),
            settling: self.settle_until.is_some(),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn send_json<T: Serialize>(
    surface: &dyn PromptSurface,
    channel: &str,
    message: &T,
) -> pd_core::BrowserResult<()> {
    let payload = serde_json::to_value(message).map_err(|error| {
        pd_core::BrowserError::new(
            "permissions.prompt_encode_failed",
            format!("failed to encode `{channel}` payload: {error}"),
        )
    })?;
    surface.send(channel, payload)
}

#[cfg(test)]
mod tests {
    use super::ArbitratorTiming;
    use super::DialogArbitrator;
    use super::PermissionRequest;
    use super::PromptOutcome;
    use super::Resolution;
    use crate::kind::Decision;
    use crate::kind::PermissionKind;
    use crate::kind::Site;
    use crate::protocol::PermissionDialogResponse;
    use crate::surface::PromptSurface;
    use crate::surface::RequesterHandle;
    use pd_core::BrowserError;
    use pd_core::BrowserResult;
    use serde_json::Value;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    const TIMEOUT: Duration = Duration::from_secs(300);
    const SETTLE: Duration = Duration::from_millis(300);

    #[derive(Default)]
    struct RecordingSurface {
        sent: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingSurface {
        fn channels(&self) -> Vec<String> {
            self.sent
                .lock()
                .map(|sent| sent.iter().map(|(channel, _)| channel.clone()).collect())
                .unwrap_or_default()
        }

        fn shown_sites(&self) -> Vec<String> {
            self.sent
                .lock()
                .map(|sent| {
                    sent.iter()
                        .filter(|(channel, _)| channel == "showPermissionDialog")
                        .filter_map(|(_, payload)| payload["site"].as_str().map(str::to_owned))
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    impl PromptSurface for RecordingSurface {
        fn send(&self, channel: &str, payload: Value) -> BrowserResult<()> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push((channel.to_owned(), payload));
            }
            Ok(())
        }
    }

    struct BrokenSurface;

    impl PromptSurface for BrokenSurface {
        fn send(&self, _channel: &str, _payload: Value) -> BrowserResult<()> {
            Err(BrowserError::new("ipc.send_failed", "window closed"))
        }
    }

    fn arbitrator() -> DialogArbitrator {
        DialogArbitrator::spawn(ArbitratorTiming {
            prompt_timeout: TIMEOUT,
            settle_delay: SETTLE,
        })
    }

    fn request(host: &str, kind: PermissionKind) -> PermissionRequest {
        let site = Site::new(host).unwrap_or_else(|_| unreachable!());
        PermissionRequest::new(site, kind, RequesterHandle(1))
    }

    fn response(host: &str, kind: PermissionKind, granted: bool, remember: bool) -> PermissionDialogResponse {
        PermissionDialogResponse {
            site: host.to_owned(),
            permission_kind: kind,
            granted,
            remember,
        }
    }

    fn submit(
        arbitrator: &DialogArbitrator,
        surface: &Arc<RecordingSurface>,
        host: &str,
        kind: PermissionKind,
    ) -> JoinHandle<PromptOutcome> {
        let arbitrator = arbitrator.clone();
        let surface: Arc<dyn PromptSurface> = surface.clone();
        let request = request(host, kind);
        tokio::spawn(async move { arbitrator.arbitrate(request, surface).await })
    }

    async fn tick() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn outcome(handle: JoinHandle<PromptOutcome>) -> PromptOutcome {
        handle.await.unwrap_or_else(|_| unreachable!())
    }

    #[tokio::test(start_paused = true)]
    async fn answer_resolves_the_showing_prompt() {
        let arbitrator = arbitrator();
        let surface = Arc::new(RecordingSurface::default());
        let pending = submit(&arbitrator, &surface, "example.com", PermissionKind::Geolocation);
        tick().await;

        assert_eq!(surface.shown_sites(), vec!["example.com"]);
        arbitrator.respond(response("example.com", PermissionKind::Geolocation, true, true));

        let outcome = outcome(pending).await;
        assert_eq!(outcome, PromptOutcome::answered(true, true));
        assert!(outcome.should_persist());
        assert_eq!(arbitrator.snapshot().await.showing, None);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_show_one_at_a_time_in_fifo_order() {
        let arbitrator = arbitrator();
        let surface = Arc::new(RecordingSurface::default());
        let first = submit(&arbitrator, &surface, "a.com", PermissionKind::Camera);
        let second = submit(&arbitrator, &surface, "b.com", PermissionKind::Microphone);
        let third = submit(&arbitrator, &surface, "c.com", PermissionKind::Notifications);
        tick().await;

        let snapshot = arbitrator.snapshot().await;
        assert_eq!(surface.shown_sites(), vec!["a.com"]);
        assert_eq!(snapshot.queued, 2);

        arbitrator.respond(response("a.com", PermissionKind::Camera, false, false));
        assert_eq!(outcome(first).await.decision, Decision::Denied);

        // Still settling: the next prompt waits for the settle delay.
        tick().await;
        assert_eq!(surface.shown_sites(), vec!["a.com"]);
        assert!(arbitrator.snapshot().await.settling);

        tokio::time::sleep(SETTLE).await;
        assert_eq!(surface.shown_sites(), vec!["a.com", "b.com"]);

        arbitrator.respond(response("b.com", PermissionKind::Microphone, true, false));
        assert_eq!(outcome(second).await.decision, Decision::Granted);
        tokio::time::sleep(SETTLE + Duration::from_millis(1)).await;
        assert_eq!(surface.shown_sites(), vec!["a.com", "b.com", "c.com"]);

        arbitrator.respond(response("c.com", PermissionKind::Notifications, true, true));
        assert_eq!(outcome(third).await, PromptOutcome::answered(true, true));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_responses_are_ignored() {
        let arbitrator = arbitrator();
        let surface = Arc::new(RecordingSurface::default());
        let pending = submit(&arbitrator, &surface, "a.com", PermissionKind::Camera);
        let queued = submit(&arbitrator, &surface, "b.com", PermissionKind::Camera);
        tick().await;

        arbitrator.respond(response("b.com", PermissionKind::Camera, true, true));
        arbitrator.respond(response("a.com", PermissionKind::Microphone, true, true));
        tick().await;

        let snapshot = arbitrator.snapshot().await;
        let expected_site = Site::new("a.com").unwrap_or_else(|_| unreachable!());
        assert_eq!(snapshot.showing, Some((expected_site, PermissionKind::Camera)));
        assert_eq!(snapshot.queued, 1);
        assert!(!pending.is_finished());
        assert!(!queued.is_finished());

        arbitrator.respond(response("A.com", PermissionKind::Camera, true, false));
        assert_eq!(outcome(pending).await, PromptOutcome::answered(true, false));
        queued.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_prompt_times_out_and_is_dismissed() {
        let arbitrator = arbitrator();
        let surface = Arc::new(RecordingSurface::default());
        let pending = submit(&arbitrator, &surface, "c.com", PermissionKind::Notifications);
        tick().await;

        tokio::time::sleep(TIMEOUT).await;
        let outcome = outcome(pending).await;
        assert_eq!(outcome.resolution, Resolution::TimedOut);
        assert_eq!(outcome.decision, Decision::Denied);
        assert!(!outcome.should_persist());
        assert_eq!(
            surface.channels(),
            vec!["showPermissionDialog", "dismissPermissionDialog"]
        );

        // A late answer after the timeout is a no-op.
        arbitrator.respond(response("c.com", PermissionKind::Notifications, true, true));
        tick().await;
        assert_eq!(arbitrator.snapshot().await.showing, None);
    }

    #[tokio::test(start_paused = true)]
    async fn undeliverable_prompt_is_denied_and_next_is_shown() {
        let arbitrator = arbitrator();
        let broken: Arc<dyn PromptSurface> = Arc::new(BrokenSurface);
        let denied = {
            let arbitrator = arbitrator.clone();
            let request = request("a.com", PermissionKind::Camera);
            tokio::spawn(async move { arbitrator.arbitrate(request, broken).await })
        };
        let surface = Arc::new(RecordingSurface::default());
        let next = submit(&arbitrator, &surface, "b.com", PermissionKind::Camera);
        tick().await;

        assert_eq!(outcome(denied).await.resolution, Resolution::Undeliverable);
        assert_eq!(surface.shown_sites(), vec!["b.com"]);
        next.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_requests_are_never_shown() {
        let arbitrator = arbitrator();
        let surface = Arc::new(RecordingSurface::default());
        let first = submit(&arbitrator, &surface, "a.com", PermissionKind::Camera);
        let abandoned = submit(&arbitrator, &surface, "b.com", PermissionKind::Camera);
        let last = submit(&arbitrator, &surface, "c.com", PermissionKind::Camera);
        tick().await;

        abandoned.abort();
        tick().await;
        arbitrator.respond(response("a.com", PermissionKind::Camera, true, false));
        assert_eq!(outcome(first).await.decision, Decision::Granted);
        tokio::time::sleep(SETTLE + Duration::from_millis(1)).await;

        assert_eq!(surface.shown_sites(), vec!["a.com", "c.com"]);
        last.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn identical_requests_share_one_prompt_and_one_answer() {
        let arbitrator = arbitrator();
        let surface = Arc::new(RecordingSurface::default());
        let first = submit(&arbitrator, &surface, "example.com", PermissionKind::Geolocation);
        let queued = submit(&arbitrator, &surface, "b.com", PermissionKind::Camera);
        let duplicate = submit(&arbitrator, &surface, "example.com", PermissionKind::Geolocation);
        let queued_duplicate = submit(&arbitrator, &surface, "b.com", PermissionKind::Camera);
        tick().await;

        assert_eq!(surface.shown_sites(), vec!["example.com"]);
        assert_eq!(arbitrator.snapshot().await.queued, 1);

        arbitrator.respond(response("example.com", PermissionKind::Geolocation, true, true));
        assert_eq!(outcome(first).await, PromptOutcome::answered(true, true));
        assert_eq!(outcome(duplicate).await, PromptOutcome::answered(true, true));

        tokio::time::sleep(SETTLE + Duration::from_millis(1)).await;
        assert_eq!(surface.shown_sites(), vec!["example.com", "b.com"]);

        arbitrator.respond(response("b.com", PermissionKind::Camera, false, false));
        assert_eq!(outcome(queued).await.decision, Decision::Denied);
        assert_eq!(outcome(queued_duplicate).await.decision, Decision::Denied);
        tokio::time::sleep(SETTLE + Duration::from_millis(1)).await;
        assert_eq!(surface.shown_sites(), vec!["example.com", "b.com"]);
    }

    #[tokio::test(start_paused = true)]
    async fn joined_request_keeps_prompt_alive_when_first_requester_leaves() {
        let arbitrator = arbitrator();
        let surface = Arc::new(RecordingSurface::default());
        let blocker = submit(&arbitrator, &surface, "a.com", PermissionKind::Camera);
        let leaving = submit(&arbitrator, &surface, "c.com", PermissionKind::Microphone);
        let staying = submit(&arbitrator, &surface, "c.com", PermissionKind::Microphone);
        tick().await;

        leaving.abort();
        tick().await;
        arbitrator.respond(response("a.com", PermissionKind::Camera, true, false));
        assert_eq!(outcome(blocker).await.decision, Decision::Granted);
        tokio::time::sleep(SETTLE + Duration::from_millis(1)).await;

        assert_eq!(surface.shown_sites(), vec!["a.com", "c.com"]);
        arbitrator.respond(response("c.com", PermissionKind::Microphone, true, false));
        assert_eq!(outcome(staying).await.decision, Decision::Granted);
    }
}
