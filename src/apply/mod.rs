pub mod cancel;
pub mod catalog;

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::{
    controller::ComponentController,
    error::ControlError,
    model::{ApplyTally, Component, ComponentRule, ControllerMethod, RuleApplyResult},
};

pub use cancel::CancelSignal;
pub use catalog::{ComponentCatalog, DeviceCatalog};

/// Packages worked on at the same time unless configured otherwise
pub const DEFAULT_MAX_CONCURRENT_PACKAGES: usize = 4;

/// Applies ordered rule lists against a [`ComponentController`]
///
/// Rules of one package are applied in input order by a single task; up to
/// `max_concurrent_packages` packages run at once. A failing rule is counted and
/// the batch moves on.
pub struct BatchRuleApplier {
    controller: Arc<ComponentController>,
    catalog: Option<Arc<dyn ComponentCatalog>>,
    max_concurrent_packages: usize,
}

/// Consecutive rules of one package sharing method and desired state
struct Run {
    method: ControllerMethod,
    state: bool,
    components: Vec<Component>,
}

impl BatchRuleApplier {
    pub fn new(controller: Arc<ComponentController>) -> Self {
        Self {
            controller,
            catalog: None,
            max_concurrent_packages: DEFAULT_MAX_CONCURRENT_PACKAGES,
        }
    }

    /// Bound the number of packages, and so of backend commands, in flight
    pub fn with_concurrency(mut self, max_concurrent_packages: usize) -> Self {
        self.max_concurrent_packages = max_concurrent_packages.max(1);
        self
    }

    /// Check every target against `catalog` before touching it
    pub fn with_catalog(mut self, catalog: Arc<dyn ComponentCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub async fn apply(&self, rules: &[ComponentRule]) -> RuleApplyResult {
        self.apply_with_cancel(rules, CancelSignal::new()).await
    }

    /// Apply `rules`, stopping between items once `cancel` fires
    ///
    /// Items left unattempted after a cancel are reported as skipped.
    pub async fn apply_with_cancel(
        &self,
        rules: &[ComponentRule],
        cancel: Arc<CancelSignal>,
    ) -> RuleApplyResult {
        log::info!("Applying {} component rules", rules.len());

        let permits = Arc::new(Semaphore::new(self.max_concurrent_packages));
        let handles: Vec<_> = split_by_package(rules)
            .into_iter()
            .map(|(package_name, runs)| {
                let count: usize = runs.iter().map(|run| run.components.len()).sum();
                let controller = Arc::clone(&self.controller);
                let catalog = self.catalog.clone();
                let cancel = Arc::clone(&cancel);
                let permits = Arc::clone(&permits);
                let handle = tokio::spawn(async move {
                    let permit = tokio::select! {
                        permit = permits.acquire_owned() => permit.ok(),
                        _ = cancel.cancelled() => None,
                    };
                    let Some(_permit) = permit else {
                        let mut tally = ApplyTally::new();
                        tally.skip(count);
                        return tally.finish();
                    };
                    apply_package(&controller, catalog.as_deref(), runs, &cancel).await
                });
                (package_name, count, handle)
            })
            .collect();

        let mut tally = ApplyTally::new();
        for (package_name, count, handle) in handles {
            match handle.await {
                Ok(result) => tally += result,
                Err(err) => {
                    log::error!("Applying rules of {package_name} aborted: {err}");
                    tally.fail(count);
                }
            }
        }

        let result = tally.finish();
        log::info!(
            "Applied component rules: {} succeeded, {} failed, {} skipped",
            result.succeed_count(),
            result.failed_count(),
            result.skipped_count()
        );
        result
    }
}

async fn apply_package(
    controller: &ComponentController,
    catalog: Option<&dyn ComponentCatalog>,
    runs: Vec<Run>,
    cancel: &CancelSignal,
) -> RuleApplyResult {
    let mut tally = ApplyTally::new();
    let mut remaining: usize = runs.iter().map(|run| run.components.len()).sum();

    for run in runs {
        if cancel.is_cancelled() {
            break;
        }
        remaining -= run.components.len();

        let mut targets = Vec::with_capacity(run.components.len());
        for component in run.components {
            let known = match catalog {
                Some(catalog) => catalog.contains(&component).await,
                None => true,
            };
            if known {
                targets.push(component);
            } else {
                let err = ControlError::ComponentNotFound {
                    component: component.flatten(),
                };
                log::error!("Skipping rule for {component}: {err}");
                tally.fail(1);
            }
        }

        match run.method {
            // One document write covers the whole run
            ControllerMethod::IntentFirewall if targets.len() > 1 => {
                tally += controller
                    .switch_components(run.method, &targets, run.state)
                    .await;
            }
            _ => {
                let mut pending = targets.len();
                for component in &targets {
                    if cancel.is_cancelled() {
                        break;
                    }
                    pending -= 1;
                    match controller
                        .switch_component(run.method, component, run.state)
                        .await
                    {
                        Ok(()) => tally.succeed(1),
                        Err(err) => {
                            log::error!("Failed to apply {} rule to {component}: {err}", run.method);
                            tally.fail(1);
                        }
                    }
                }
                tally.skip(pending);
            }
        }
    }

    tally.skip(remaining);
    tally.finish()
}

/// Per-package runs in input order, packages in first-seen order
fn split_by_package(rules: &[ComponentRule]) -> Vec<(String, Vec<Run>)> {
    let mut packages: Vec<(String, Vec<Run>)> = Vec::new();
    for rule in rules {
        let index = match packages
            .iter()
            .position(|(package_name, _)| *package_name == rule.package_name)
        {
            Some(index) => index,
            None => {
                packages.push((rule.package_name.clone(), Vec::new()));
                packages.len() - 1
            }
        };
        let runs = &mut packages[index].1;
        match runs.last_mut() {
            Some(run) if run.method == rule.method && run.state == rule.state => {
                run.components.push(rule.component());
            }
            _ => runs.push(Run {
                method: rule.method,
                state: rule.state,
                components: vec![rule.component()],
            }),
        }
    }
    packages
}
