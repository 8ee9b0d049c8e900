//! Builder that validates a whole procedure definition at once.

use super::error::BuildError;
use super::handle::ProcedureHandle;
use super::step::{Step, StepState};
use super::Procedure;
use crate::machine::{MachineState, StateKey};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

/// Collects steps and blackboard seed values, then checks all of them in
/// one pass.
///
/// Seeds are written to the blackboard before any step is added, so step
/// `init` hooks can read them.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use stagehand::machine::StateError;
/// use stagehand::procedure::{Procedure, Step, StepContext};
///
/// struct Warmup;
///
/// #[async_trait]
/// impl Step for Warmup {
///     async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
///         cx.finish();
///         Ok(())
///     }
/// }
///
/// let procedure = Procedure::builder("Boot")
///     .seed("retries", &3u32)
///     .step(Warmup)
///     .build()
///     .unwrap();
///
/// assert_eq!(procedure.steps().len(), 1);
/// assert_eq!(procedure.blackboard().read::<u32>("retries").unwrap(), 3);
/// ```
pub struct ProcedureBuilder {
    name: String,
    steps: Vec<(StateKey, Box<dyn MachineState<ProcedureHandle>>)>,
    seeds: Vec<(String, Result<Value, String>)>,
}

impl ProcedureBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            seeds: Vec::new(),
        }
    }

    /// Append a step.
    pub fn step<S: Step>(mut self, step: S) -> Self {
        self.steps
            .push((StateKey::of::<S>(), Box::new(StepState(step))));
        self
    }

    /// Store `value` under `key` on the blackboard before any step runs.
    pub fn seed<T: Serialize>(mut self, key: impl Into<String>, value: &T) -> Self {
        let encoded = serde_json::to_value(value).map_err(|e| e.to_string());
        self.seeds.push((key.into(), encoded));
        self
    }

    /// Check the definition, accumulating every problem.
    pub fn validate(&self) -> Validation<(), NonEmptyVec<BuildError>> {
        let mut checks: Vec<Validation<(), NonEmptyVec<BuildError>>> = Vec::new();

        checks.push(if self.name.trim().is_empty() {
            Validation::fail(BuildError::EmptyName)
        } else {
            Validation::success(())
        });

        checks.push(if self.steps.is_empty() {
            Validation::fail(BuildError::NoSteps)
        } else {
            Validation::success(())
        });

        let mut seen_steps = HashSet::new();
        for (key, _) in &self.steps {
            if !seen_steps.insert(*key) {
                checks.push(Validation::fail(BuildError::DuplicateStep(key.name())));
            }
        }

        let mut seen_seeds = HashSet::new();
        for (key, encoded) in &self.seeds {
            if !seen_seeds.insert(key.as_str()) {
                checks.push(Validation::fail(BuildError::DuplicateSeed(key.clone())));
            }
            if let Err(message) = encoded {
                checks.push(Validation::fail(BuildError::InvalidSeed {
                    key: key.clone(),
                    message: message.clone(),
                }));
            }
        }

        Validation::all_vec(checks).map(|_| ())
    }

    /// Validate, then assemble the procedure and run every step's `init`.
    pub fn build(self) -> Result<Procedure, BuildError> {
        if let Validation::Failure(errors) = self.validate() {
            return Err(BuildError::Invalid(errors.iter().cloned().collect()));
        }

        let mut procedure = Procedure::new(self.name);
        for (key, value) in self.seeds {
            if let Ok(value) = value {
                procedure
                    .blackboard_mut()
                    .write(key.clone(), &value)
                    .map_err(|e| BuildError::InvalidSeed {
                        key,
                        message: e.to_string(),
                    })?;
            }
        }
        for (key, state) in self.steps {
            procedure.add_boxed(key, state)?;
        }

        tracing::debug!(procedure = procedure.name(), steps = procedure.steps().len(), "procedure built");
        Ok(procedure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::StateError;
    use crate::procedure::{ProcedureOutcome, StepContext};
    use async_trait::async_trait;

    struct Greet;
    struct Count;
    struct NeedsSeed;

    #[async_trait]
    impl Step for Greet {
        async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            let who: String = cx.blackboard().read("who")?;
            cx.blackboard().write("greeting", &format!("hello {who}"))?;
            cx.finish();
            Ok(())
        }
    }

    #[async_trait]
    impl Step for Count {
        async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            cx.finish();
            Ok(())
        }
    }

    #[async_trait]
    impl Step for NeedsSeed {
        fn init(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            cx.blackboard().read::<u32>("limit")?;
            Ok(())
        }

        async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            cx.finish();
            Ok(())
        }
    }

    #[tokio::test]
    async fn built_procedure_runs_with_seeds() {
        let mut procedure = ProcedureBuilder::new("Hello")
            .seed("who", &"world")
            .step(Greet)
            .step(Count)
            .build()
            .unwrap();

        assert_eq!(procedure.run().await.unwrap(), ProcedureOutcome::Finished);
        assert_eq!(
            procedure.blackboard().read::<String>("greeting").unwrap(),
            "hello world"
        );
    }

    #[test]
    fn validation_accumulates_all_problems() {
        let builder = ProcedureBuilder::new("  ")
            .seed("who", &1)
            .seed("who", &2);

        match builder.validate() {
            Validation::Failure(errors) => {
                assert_eq!(errors.len(), 3);
                assert!(errors.iter().any(|e| matches!(e, BuildError::EmptyName)));
                assert!(errors.iter().any(|e| matches!(e, BuildError::NoSteps)));
                assert!(errors
                    .iter()
                    .any(|e| matches!(e, BuildError::DuplicateSeed(k) if k == "who")));
            }
            Validation::Success(_) => panic!("Expected failures, got success"),
        }
    }

    #[test]
    fn duplicate_steps_are_reported() {
        let err = ProcedureBuilder::new("Twice")
            .step(Count)
            .step(Count)
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            BuildError::Invalid(vec![BuildError::DuplicateStep("Count")])
        );
    }

    #[test]
    fn init_hooks_see_seeds() {
        let built = ProcedureBuilder::new("Seeded")
            .seed("limit", &10u32)
            .step(NeedsSeed)
            .build();
        assert!(built.is_ok());

        let err = ProcedureBuilder::new("Unseeded")
            .step(NeedsSeed)
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::Step(_)));
    }

    #[test]
    fn unencodable_seed_is_reported() {
        use std::collections::HashMap;

        let mut bad = HashMap::new();
        bad.insert(vec![1u8], 1u8);

        let err = ProcedureBuilder::new("Bad")
            .seed("map", &bad)
            .step(Count)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::Invalid(ref problems)
                if matches!(problems.as_slice(), [BuildError::InvalidSeed { key, .. }] if key == "map")
        ));
    }
}
