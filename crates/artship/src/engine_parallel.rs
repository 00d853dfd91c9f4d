use std::collections::BTreeMap;
use std::sync::Mutex;
use std::thread;

use anyhow::{Result, bail};
use chrono::Utc;

use crate::engine::{self, Collaborators, Reporter};
use crate::environment::TriggerContext;
use crate::receipt::RECEIPT_VERSION;
use crate::types::{RunReceipt, RuntimeOptions, SourceUnit, TargetRepo, UnitReceipt, UnitState};

/// Forwards one unit's messages to the shared sink, prefixed with the unit
/// name when more than one unit is running.
struct UnitReporter<'a, 'b> {
    label: Option<String>,
    sink: &'a Mutex<&'b mut (dyn Reporter + Send)>,
}

impl UnitReporter<'_, '_> {
    fn line(&self, msg: &str) -> String {
        match &self.label {
            Some(l) => format!("[{l}] {msg}"),
            None => msg.to_string(),
        }
    }

    fn with_sink(&self, f: impl FnOnce(&mut dyn Reporter)) {
        let mut guard = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut **guard);
    }
}

impl Reporter for UnitReporter<'_, '_> {
    fn info(&mut self, msg: &str) {
        let line = self.line(msg);
        self.with_sink(|r| r.info(&line));
    }

    fn warn(&mut self, msg: &str) {
        let line = self.line(msg);
        self.with_sink(|r| r.warn(&line));
    }

    fn error(&mut self, msg: &str) {
        let line = self.line(msg);
        self.with_sink(|r| r.error(&line));
    }

    fn debug(&mut self, msg: &str) {
        let line = self.line(msg);
        self.with_sink(|r| r.debug(&line));
    }
}

/// Rejects unit sets whose pipelines would race on the same artifact
/// repository.
pub fn check_targets(units: &[SourceUnit], opts: &RuntimeOptions) -> Result<()> {
    if units.len() > 1 && opts.repo_name.is_some() {
        bail!(
            "an explicit repository name cannot be used with {} units; each unit needs its own repository",
            units.len()
        );
    }

    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    for unit in units {
        // Naming errors surface in the unit's own pipeline.
        let Ok(target) = TargetRepo::for_unit(unit, &opts.owner, opts.repo_name.as_deref()) else {
            continue;
        };
        if let Some(other) = seen.insert(target.name.clone(), unit.display_name()) {
            bail!(
                "units {other} and {} both publish to {target}",
                unit.display_name()
            );
        }
    }
    Ok(())
}

/// Runs every unit's pipeline on its own thread. A unit failure is recorded
/// in its receipt and never stops the others.
pub fn run_units(
    units: &[SourceUnit],
    opts: &RuntimeOptions,
    trigger: &TriggerContext,
    deps: Collaborators<'_>,
    reporter: &mut (dyn Reporter + Send),
) -> Result<RunReceipt> {
    check_targets(units, opts)?;
    let started_at = Utc::now();
    let labelled = units.len() > 1;
    reporter.info(&format!("publishing {} unit(s)", units.len()));

    let sink = Mutex::new(reporter);
    let receipts: Vec<UnitReceipt> = thread::scope(|scope| {
        let handles: Vec<_> = units
            .iter()
            .map(|unit| {
                let sink = &sink;
                scope.spawn(move || {
                    let mut rep = UnitReporter {
                        label: labelled.then(|| unit.display_name().to_string()),
                        sink,
                    };
                    engine::publish_unit(unit, opts, trigger, deps, &mut rep)
                })
            })
            .collect();

        handles
            .into_iter()
            .zip(units)
            .map(|(handle, unit)| {
                handle.join().unwrap_or_else(|_| UnitReceipt {
                    unit: unit.display_name().to_string(),
                    started_at,
                    finished_at: Utc::now(),
                    duration_ms: 0,
                    state: UnitState::Failed {
                        message: "publish thread panicked".to_string(),
                    },
                })
            })
            .collect()
    });

    let receipt = RunReceipt {
        receipt_version: RECEIPT_VERSION.to_string(),
        started_at,
        finished_at: Utc::now(),
        units: receipts,
    };

    let reporter = sink.into_inner().unwrap_or_else(|e| e.into_inner());
    let failed = receipt.failed_count();
    if failed == 0 {
        reporter.info(&format!("published {} unit(s)", receipt.units.len()));
    } else {
        reporter.error(&format!(
            "{failed} of {} unit(s) failed",
            receipt.units.len()
        ));
    }
    Ok(receipt)
}
