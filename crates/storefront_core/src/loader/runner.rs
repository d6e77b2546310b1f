//! Two-phase registration runner.
//!
//! # Responsibility
//! - Execute registrations of enabled modules in module load order.
//! - Run the default phase for every module before the context phase of any.
//! - Isolate failures, panics included: report each one and keep going.
//!
//! # Invariants
//! - Execution is sequential; callbacks mutate shared registries unlocked.
//! - `default` never runs twice when it is also the requested context.
//! - A rejected context name still runs the default phase.

use crate::loader::capability::Capabilities;
use crate::loader::source::RegistrationSource;
use crate::loader::RegistrationError;
use crate::logging::summarize_panic_payload;
use crate::module::registry::ModuleRecord;
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};

/// Context whose registrations always run first.
pub const DEFAULT_CONTEXT: &str = "default";

static CONTEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-z0-9][a-z0-9_-]*$").expect("context regex must compile")
});

/// Returns whether `context` is usable as a registration context name.
pub fn is_valid_context(context: &str) -> bool {
    CONTEXT_RE.is_match(context)
}

/// One registration invocation, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedRegistration {
    pub module: String,
    pub file: String,
    /// Phase the registration ran in.
    pub context: String,
}

#[derive(Debug)]
pub struct RegistrationFailure {
    pub module: String,
    pub file: String,
    pub context: String,
    pub error: RegistrationError,
}

/// Outcome of one [`RegistrationLoader::run`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Every invocation in execution order, failed ones included.
    pub executed: Vec<ExecutedRegistration>,
    pub failures: Vec<RegistrationFailure>,
    /// Requested context when its name was rejected.
    pub rejected_context: Option<String>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.rejected_context.is_none()
    }
}

type ErrorHandler<'s> = Box<dyn FnMut(&RegistrationFailure) + 's>;

/// Runs registrations located by a [`RegistrationSource`].
pub struct RegistrationLoader<'s> {
    source: &'s dyn RegistrationSource,
    on_error: ErrorHandler<'s>,
}

impl<'s> RegistrationLoader<'s> {
    /// Loader with the default log-and-continue error handler.
    pub fn new(source: &'s dyn RegistrationSource) -> Self {
        Self {
            source,
            on_error: Box::new(log_failure),
        }
    }

    /// Replaces the error handler. Failures are still collected in the report.
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&RegistrationFailure) + 's,
    {
        self.on_error = Box::new(handler);
        self
    }

    /// Executes registrations for `context` across `modules`.
    ///
    /// Only enabled modules accepted by `filter` participate. `modules` is
    /// expected in load order, as produced by discovery.
    pub fn run(
        &mut self,
        context: &str,
        modules: &[ModuleRecord],
        capabilities: &mut Capabilities<'_>,
        filter: Option<&dyn Fn(&ModuleRecord) -> bool>,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        let requested = context.trim();
        let requested = if requested.is_empty() {
            DEFAULT_CONTEXT
        } else {
            requested
        };

        let mut phases = vec![DEFAULT_CONTEXT];
        if !is_valid_context(requested) {
            warn!(
                "event=registration_context_rejected module=loader status=warn context={requested:?}"
            );
            report.rejected_context = Some(requested.to_string());
        } else if !requested.eq_ignore_ascii_case(DEFAULT_CONTEXT) {
            phases.push(requested);
        }
        let callback_context = if report.rejected_context.is_some() {
            DEFAULT_CONTEXT
        } else {
            requested
        };

        let participants: Vec<&ModuleRecord> = modules
            .iter()
            .filter(|module| module.enabled)
            .filter(|module| filter.map_or(true, |accept| accept(*module)))
            .collect();

        info!(
            "event=registration_run module=loader status=start context={} modules={}",
            callback_context,
            participants.len()
        );

        for phase in phases {
            for module in &participants {
                for registration in self.source.locate(module, phase) {
                    let file = registration.label().to_string();
                    report.executed.push(ExecutedRegistration {
                        module: module.name.clone(),
                        file: file.clone(),
                        context: phase.to_string(),
                    });

                    capabilities.set_current_module(Some(&module.name));
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        registration.register(capabilities, callback_context)
                    }))
                    .unwrap_or_else(|payload| {
                        Err(RegistrationError::Callback(format!(
                            "panicked: {}",
                            summarize_panic_payload(payload.as_ref())
                        )))
                    });
                    capabilities.set_current_module(None);

                    match outcome {
                        Ok(()) => debug!(
                            "event=registration_executed module=loader status=ok name={} file={} phase={}",
                            module.name, file, phase
                        ),
                        Err(error) => {
                            let failure = RegistrationFailure {
                                module: module.name.clone(),
                                file,
                                context: phase.to_string(),
                                error,
                            };
                            (self.on_error)(&failure);
                            report.failures.push(failure);
                        }
                    }
                }
            }
        }

        info!(
            "event=registration_run module=loader status=ok context={} executed={} failed={}",
            callback_context,
            report.executed.len(),
            report.failures.len()
        );
        report
    }
}

fn log_failure(failure: &RegistrationFailure) {
    error!(
        "event=registration_failed module=loader status=error name={} file={} phase={} error={}",
        failure.module, failure.file, failure.context, failure.error
    );
}

#[cfg(test)]
mod tests {
    use super::{is_valid_context, RegistrationLoader, DEFAULT_CONTEXT};
    use crate::components::ComponentTable;
    use crate::loader::capability::Capabilities;
    use crate::loader::source::StaticRegistrations;
    use crate::loader::RegistrationError;
    use crate::module::descriptor::ModuleOrigin;
    use crate::module::registry::ModuleRecord;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    fn record(name: &str, enabled: bool) -> ModuleRecord {
        ModuleRecord {
            name: name.to_string(),
            location: PathBuf::from(name),
            origin: ModuleOrigin::Local,
            enabled,
            declared_dependencies: Vec::new(),
            has_registration_descriptor: false,
            missing_dependencies: Vec::new(),
        }
    }

    fn recording(
        registrations: &mut StaticRegistrations,
        log: &Arc<Mutex<Vec<String>>>,
        module: &str,
        context: &str,
    ) {
        let log = Arc::clone(log);
        let label = format!("{module}/{context}");
        let file = label.clone();
        registrations.register(module, context, &file, move |_, _| {
            log.lock().expect("log lock").push(label.clone());
            Ok(())
        });
    }

    #[test]
    fn default_phase_runs_for_all_modules_before_context_phase() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registrations = StaticRegistrations::new();
        recording(&mut registrations, &log, "a", "checkout");
        recording(&mut registrations, &log, "a", DEFAULT_CONTEXT);
        recording(&mut registrations, &log, "b", "checkout");
        recording(&mut registrations, &log, "b", DEFAULT_CONTEXT);
        let modules = vec![record("a", true), record("b", true)];

        let mut capabilities = Capabilities::new();
        let report = RegistrationLoader::new(&registrations).run(
            "checkout",
            &modules,
            &mut capabilities,
            None,
        );

        assert_eq!(
            *log.lock().expect("log lock"),
            vec!["a/default", "b/default", "a/checkout", "b/checkout"]
        );
        assert_eq!(report.executed.len(), 4);
        assert!(report.is_clean());
    }

    #[test]
    fn default_context_runs_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registrations = StaticRegistrations::new();
        recording(&mut registrations, &log, "a", DEFAULT_CONTEXT);
        let modules = vec![record("a", true)];

        let mut capabilities = Capabilities::new();
        RegistrationLoader::new(&registrations).run("default", &modules, &mut capabilities, None);
        assert_eq!(*log.lock().expect("log lock"), vec!["a/default"]);
    }

    #[test]
    fn failures_are_reported_and_later_registrations_still_run() {
        let mut registrations = StaticRegistrations::new();
        registrations
            .register("a", DEFAULT_CONTEXT, "a/boom", |_, _| {
                Err(RegistrationError::Callback("boom".to_string()))
            })
            .register("b", DEFAULT_CONTEXT, "b/components", |capabilities, _| {
                capabilities.register_component("Logo", None)
            });
        let modules = vec![record("a", true), record("b", true)];

        let mut seen = Vec::new();
        let mut components = ComponentTable::new();
        let report = {
            let mut capabilities = Capabilities::new().with_components(&mut components);
            let mut loader = RegistrationLoader::new(&registrations)
                .with_error_handler(|failure| seen.push(failure.file.clone()));
            loader.run(DEFAULT_CONTEXT, &modules, &mut capabilities, None)
        };

        assert_eq!(seen, vec!["a/boom"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].module, "a");
        assert_eq!(report.executed.len(), 2);
        let logo = components.get("Logo").expect("b still registered");
        assert_eq!(logo.module.as_deref(), Some("b"));
    }

    #[test]
    fn panicking_registration_is_reported_and_later_modules_still_run() {
        let mut registrations = StaticRegistrations::new();
        registrations
            .register("a", DEFAULT_CONTEXT, "a/panics", |_, _| {
                let empty: Vec<u8> = Vec::new();
                let _first: u8 = empty[0];
                Ok(())
            })
            .register("b", DEFAULT_CONTEXT, "b/components", |capabilities, _| {
                capabilities.register_component("Logo", None)
            });
        let modules = vec![record("a", true), record("b", true)];

        let mut components = ComponentTable::new();
        let report = {
            let mut capabilities = Capabilities::new().with_components(&mut components);
            let report = RegistrationLoader::new(&registrations).run(
                DEFAULT_CONTEXT,
                &modules,
                &mut capabilities,
                None,
            );
            assert_eq!(capabilities.current_module(), None);
            report
        };

        assert_eq!(report.executed.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].file, "a/panics");
        match &report.failures[0].error {
            RegistrationError::Callback(message) => {
                assert!(message.contains("panicked"));
                assert!(!message.contains('\n'));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(components.contains("Logo"));
    }

    #[test]
    fn default_context_matches_case_insensitively() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registrations = StaticRegistrations::new();
        recording(&mut registrations, &log, "a", DEFAULT_CONTEXT);
        let modules = vec![record("a", true)];

        let mut capabilities = Capabilities::new();
        let report = RegistrationLoader::new(&registrations).run(
            "DEFAULT",
            &modules,
            &mut capabilities,
            None,
        );
        assert_eq!(*log.lock().expect("log lock"), vec!["a/default"]);
        assert_eq!(report.executed.len(), 1);
        assert!(report.is_clean());
    }

    #[test]
    fn disabled_and_filtered_modules_are_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registrations = StaticRegistrations::new();
        recording(&mut registrations, &log, "a", DEFAULT_CONTEXT);
        recording(&mut registrations, &log, "b", DEFAULT_CONTEXT);
        recording(&mut registrations, &log, "c", DEFAULT_CONTEXT);
        let modules = vec![record("a", true), record("b", false), record("c", true)];

        let only_a = |module: &ModuleRecord| module.name == "a";
        let mut capabilities = Capabilities::new();
        RegistrationLoader::new(&registrations).run(
            DEFAULT_CONTEXT,
            &modules,
            &mut capabilities,
            Some(&only_a),
        );
        assert_eq!(*log.lock().expect("log lock"), vec!["a/default"]);
    }

    #[test]
    fn rejected_context_runs_default_phase_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registrations = StaticRegistrations::new();
        recording(&mut registrations, &log, "a", DEFAULT_CONTEXT);
        let modules = vec![record("a", true)];

        let mut capabilities = Capabilities::new();
        let report = RegistrationLoader::new(&registrations).run(
            "../etc",
            &modules,
            &mut capabilities,
            None,
        );
        assert_eq!(report.rejected_context.as_deref(), Some("../etc"));
        assert_eq!(*log.lock().expect("log lock"), vec!["a/default"]);
    }

    #[test]
    fn callbacks_receive_requested_context() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registrations = StaticRegistrations::new();
        let sink = Arc::clone(&seen);
        registrations.register("a", DEFAULT_CONTEXT, "a/default", move |_, context| {
            sink.lock().expect("seen lock").push(context.to_string());
            Ok(())
        });
        let modules = vec![record("a", true)];

        let mut capabilities = Capabilities::new();
        RegistrationLoader::new(&registrations).run("search", &modules, &mut capabilities, None);
        assert_eq!(*seen.lock().expect("seen lock"), vec!["search"]);
    }

    #[test]
    fn validates_context_names() {
        assert!(is_valid_context("default"));
        assert!(is_valid_context("product-page_2"));
        assert!(!is_valid_context(""));
        assert!(!is_valid_context("-leading"));
        assert!(!is_valid_context("a/b"));
    }
}
