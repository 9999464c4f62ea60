use std::{borrow::Cow, future::Future, pin::Pin};

use log::debug;
use threescale_operator_core::error::ReconcileError;

/// Result of a single step. `true` asks for another reconciliation pass
/// before anything that follows may run.
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, ReconcileError>> + Send + 'a>>;

type StepFn<U> = Box<dyn for<'a> Fn(&'a U) -> StepFuture<'a> + Send + Sync>;
type Predicate<U> = Box<dyn Fn(&U) -> bool + Send + Sync>;

/// A composable piece of an upgrade procedure working on `U`.
///
/// Steps hold no state of their own, everything they find or change lives in
/// the cluster, so a pipeline can be rebuilt and rerun on every pass.
pub enum Step<U> {
    Run {
        name: Cow<'static, str>,
        run: StepFn<U>,
    },
    Sequence {
        name: Cow<'static, str>,
        steps: Vec<Step<U>>,
    },
    When {
        predicate: Predicate<U>,
        step: Box<Step<U>>,
    },
}

impl<U: Sync> Step<U> {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, run: F) -> Self
    where
        F: for<'a> Fn(&'a U) -> StepFuture<'a> + Send + Sync + 'static,
    {
        Step::Run {
            name: name.into(),
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Step::Run { name, .. } | Step::Sequence { name, .. } => name,
            Step::When { step, .. } => step.name(),
        }
    }

    pub fn run<'a>(&'a self, upgrade: &'a U) -> StepFuture<'a> {
        Box::pin(async move {
            match self {
                Step::Run { name, run } => {
                    debug!("Running '{name}'...");

                    run(upgrade)
                        .await
                        .map_err(|error| error.in_step(name.clone()))
                }
                Step::Sequence { name, steps } => {
                    debug!("Running '{name}'...");

                    for step in steps {
                        if step.run(upgrade).await? {
                            debug!("'{}' requested another pass", step.name());
                            return Ok(true);
                        }
                    }

                    Ok(false)
                }
                Step::When { predicate, step } => match predicate(upgrade) {
                    true => step.run(upgrade).await,
                    false => {
                        debug!("Skipping '{}'", step.name());
                        Ok(false)
                    }
                },
            }
        })
    }
}

/// Runs `steps` in order until one of them asks for another pass or fails.
pub fn sequentially<U>(name: impl Into<Cow<'static, str>>, steps: Vec<Step<U>>) -> Step<U> {
    Step::Sequence {
        name: name.into(),
        steps,
    }
}

/// Runs `step` only while `predicate` holds. The predicate is evaluated on
/// every run.
pub fn when<U, P>(predicate: P, step: Step<U>) -> Step<U>
where
    P: Fn(&U) -> bool + Send + Sync + 'static,
{
    Step::When {
        predicate: Box::new(predicate),
        step: Box::new(step),
    }
}

pub fn and_then<U: Sync>(first: Step<U>, then: Step<U>) -> Step<U> {
    let name = format!("{}, {}", first.name(), then.name());

    sequentially(name, vec![first, then])
}
