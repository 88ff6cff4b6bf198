use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::{error, trace};

use super::ModemError;

/// Cooperative cancellation token shared between a flow and its caller.
///
/// Cancelling is idempotent: the first call flips the token, later calls
/// are silent no-ops. Watchers observe the flip through [`cancelled`].
///
/// [`cancelled`]: CancelToken::cancelled
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancellation is requested.
    ///
    /// Resolves immediately if the token is already cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender half lives in self, so wait_for cannot observe a
        // closed channel while we are borrowed.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// What a step tells the sequencer to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Continue with the next step.
    Advance,

    /// Terminal success. Only valid on the last step of a list.
    Done,
}

/// Boxed future returned by a step handler.
pub type StepFuture = BoxFuture<'static, Result<StepOutcome, ModemError>>;

/// A step handler: receives the target entity and the flow's cancellation
/// token, performs its (possibly suspending) work, and reports an outcome.
pub type StepHandler<E> = Box<dyn Fn(Arc<E>, Option<CancelToken>) -> StepFuture + Send + Sync>;

/// One named step in an ordered operation.
///
/// A step whose handler is absent auto-advances; this is how entity
/// variants opt out of stages they have no work for.
pub struct Step<E> {
    /// Step name, used in logs.
    pub name: &'static str,

    /// The handler, if this entity variant implements the step.
    pub handler: Option<StepHandler<E>>,
}

impl<E> Step<E> {
    /// A step with a handler.
    pub fn new<F>(name: &'static str, handler: F) -> Self
    where
        F: Fn(Arc<E>, Option<CancelToken>) -> StepFuture + Send + Sync + 'static,
    {
        Self {
            name,
            handler: Some(Box::new(handler)),
        }
    }

    /// A step this entity variant does not implement; treated as an
    /// automatic advance.
    pub fn absent(name: &'static str) -> Self {
        Self {
            name,
            handler: None,
        }
    }
}

/// Per-invocation state of a multi-step flow.
///
/// The step index only ever moves forward, and exactly one terminal
/// transition (success or error) occurs over the context's lifetime.
/// Re-running a terminal context is a contract breach, not a runtime
/// condition.
#[derive(Debug)]
pub struct OperationContext {
    operation: &'static str,
    step: usize,
    finished: bool,
    cancel: Option<CancelToken>,
    deadline: Option<Duration>,
}

impl OperationContext {
    /// Create a context positioned at the first step.
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            step: 0,
            finished: false,
            cancel: None,
            deadline: None,
        }
    }

    /// Attach a cancellation token. Checked between steps and raced inside
    /// suspending steps.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Attach an overall deadline for the whole flow.
    #[must_use]
    pub fn with_deadline(mut self, limit: Duration) -> Self {
        self.deadline = Some(limit);
        self
    }

    /// Name of the operation this context drives.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Current step index.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Whether the context has reached its terminal transition.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Execute `steps` in order against `entity`, starting at the context's
/// current index.
///
/// Each step either advances, suspends internally on its own awaits, fails
/// the whole operation, or (on the last step only) reports terminal
/// success. Missing handlers auto-advance. The attached cancellation token
/// is honored at step boundaries; steps that suspend for long periods race
/// it themselves.
///
/// # Errors
/// Returns the failing step's error, `Cancelled` when the token fired
/// between steps, `Timeout` when the context deadline elapsed, or
/// `InvariantViolation` when called on an already-terminal context.
pub async fn run<E>(
    entity: &Arc<E>,
    ctx: &mut OperationContext,
    steps: &[Step<E>],
) -> Result<(), ModemError>
where
    E: Send + Sync + 'static,
{
    if ctx.finished {
        error!(operation = ctx.operation, "Operation re-run after finishing");
        return Err(ModemError::InvariantViolation(format!(
            "operation '{}' was re-run after reaching a terminal state",
            ctx.operation
        )));
    }

    match ctx.deadline {
        Some(limit) => {
            let operation = ctx.operation;
            match tokio::time::timeout(limit, run_steps(entity, ctx, steps)).await {
                Ok(result) => result,
                Err(_) => {
                    ctx.finished = true;
                    Err(ModemError::Timeout { operation })
                }
            }
        }
        None => run_steps(entity, ctx, steps).await,
    }
}

async fn run_steps<E>(
    entity: &Arc<E>,
    ctx: &mut OperationContext,
    steps: &[Step<E>],
) -> Result<(), ModemError>
where
    E: Send + Sync + 'static,
{
    while ctx.step < steps.len() {
        if ctx.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            ctx.finished = true;
            return Err(ModemError::Cancelled);
        }

        let step = &steps[ctx.step];
        let Some(handler) = &step.handler else {
            trace!(operation = ctx.operation, step = step.name, "Step absent, advancing");
            ctx.step += 1;
            continue;
        };

        trace!(operation = ctx.operation, step = step.name, index = ctx.step, "Running step");
        match handler(Arc::clone(entity), ctx.cancel.clone()).await {
            Ok(StepOutcome::Advance) => ctx.step += 1,
            Ok(StepOutcome::Done) => {
                if ctx.step + 1 != steps.len() {
                    ctx.finished = true;
                    error!(
                        operation = ctx.operation,
                        step = step.name,
                        "Step reported terminal success before the last step"
                    );
                    return Err(ModemError::InvariantViolation(format!(
                        "step '{}' reported terminal success at index {} of {}",
                        step.name,
                        ctx.step,
                        steps.len()
                    )));
                }
                ctx.finished = true;
                return Ok(());
            }
            Err(error) => {
                ctx.finished = true;
                return Err(error);
            }
        }
    }

    ctx.finished = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        visited: Mutex<Vec<&'static str>>,
    }

    impl Recorder {
        fn note(&self, name: &'static str) {
            self.visited.lock().unwrap().push(name);
        }

        fn visited(&self) -> Vec<&'static str> {
            self.visited.lock().unwrap().clone()
        }
    }

    fn advancing(name: &'static str) -> Step<Recorder> {
        Step::new(name, move |recorder: Arc<Recorder>, _| {
            Box::pin(async move {
                recorder.note(name);
                Ok(StepOutcome::Advance)
            })
        })
    }

    #[tokio::test]
    async fn runs_steps_in_order_and_finishes_once() {
        let recorder = Arc::new(Recorder::default());
        let steps = vec![advancing("first"), advancing("second"), advancing("third")];
        let mut ctx = OperationContext::new("test");

        run(&recorder, &mut ctx, &steps).await.unwrap();

        assert_eq!(recorder.visited(), vec!["first", "second", "third"]);
        assert!(ctx.is_finished());
        assert_eq!(ctx.step(), steps.len());
    }

    #[tokio::test]
    async fn absent_steps_auto_advance() {
        let recorder = Arc::new(Recorder::default());
        let steps = vec![
            Step::absent("unimplemented"),
            advancing("real"),
            Step::absent("also-unimplemented"),
        ];
        let mut ctx = OperationContext::new("test");

        run(&recorder, &mut ctx, &steps).await.unwrap();

        assert_eq!(recorder.visited(), vec!["real"]);
        assert!(ctx.is_finished());
    }

    #[tokio::test]
    async fn done_on_last_step_succeeds() {
        let recorder = Arc::new(Recorder::default());
        let steps = vec![
            advancing("first"),
            Step::new("last", |recorder: Arc<Recorder>, _| {
                Box::pin(async move {
                    recorder.note("last");
                    Ok(StepOutcome::Done)
                })
            }),
        ];
        let mut ctx = OperationContext::new("test");

        run(&recorder, &mut ctx, &steps).await.unwrap();
        assert_eq!(recorder.visited(), vec!["first", "last"]);
    }

    #[tokio::test]
    async fn failing_step_is_terminal() {
        let recorder = Arc::new(Recorder::default());
        let steps = vec![
            advancing("first"),
            Step::new("broken", |_, _| {
                Box::pin(async {
                    Err(ModemError::ProtocolFailure {
                        operation: "test",
                        reason: "nope".into(),
                    })
                })
            }),
            advancing("unreached"),
        ];
        let mut ctx = OperationContext::new("test");

        let error = run(&recorder, &mut ctx, &steps).await.unwrap_err();
        assert!(matches!(error, ModemError::ProtocolFailure { .. }));
        assert_eq!(recorder.visited(), vec!["first"]);
        assert!(ctx.is_finished());
        assert_eq!(ctx.step(), 1);
    }

    #[tokio::test]
    async fn rerunning_terminal_context_is_a_contract_breach() {
        let recorder = Arc::new(Recorder::default());
        let steps = vec![advancing("only")];
        let mut ctx = OperationContext::new("test");

        run(&recorder, &mut ctx, &steps).await.unwrap();
        let error = run(&recorder, &mut ctx, &steps).await.unwrap_err();
        assert!(error.is_invariant_violation());
        // The step list did not run a second time.
        assert_eq!(recorder.visited(), vec!["only"]);
    }

    #[tokio::test]
    async fn cancellation_between_steps_wins() {
        let recorder = Arc::new(Recorder::default());
        let token = CancelToken::new();
        let cancel = token.clone();
        let steps = vec![
            Step::new("first", move |recorder: Arc<Recorder>, _| {
                let cancel = cancel.clone();
                Box::pin(async move {
                    recorder.note("first");
                    cancel.cancel();
                    Ok(StepOutcome::Advance)
                })
            }),
            advancing("second"),
        ];
        let mut ctx = OperationContext::new("test").with_cancel(token.clone());

        let error = run(&recorder, &mut ctx, &steps).await.unwrap_err();
        assert!(matches!(error, ModemError::Cancelled));
        assert_eq!(recorder.visited(), vec!["first"]);

        // Cancelling again is a silent no-op.
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_is_a_timeout() {
        let recorder = Arc::new(Recorder::default());
        let steps = vec![Step::new("stalls", |_: Arc<Recorder>, _| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(StepOutcome::Advance)
            })
        })];
        let mut ctx =
            OperationContext::new("test").with_deadline(Duration::from_secs(5));

        let error = run(&recorder, &mut ctx, &steps).await.unwrap_err();
        assert!(matches!(error, ModemError::Timeout { .. }));
        assert!(ctx.is_finished());
    }
}
