pub mod pm;

use std::sync::Arc;

use crate::{
    error::ControlError,
    ifw::IfwRuleStore,
    model::{ApplyTally, Component, ControllerMethod, RuleApplyResult},
    shell::PrivilegedShell,
};

pub use pm::PackageManagerControl;

/// Routes enable/disable/query requests to the package manager or the intent firewall
///
/// The method is chosen per call, so the same component can be driven through
/// both mechanisms; their states are independent of each other.
pub struct ComponentController {
    pm: PackageManagerControl,
    ifw: IfwRuleStore,
}

impl ComponentController {
    pub fn new(shell: Arc<dyn PrivilegedShell>, ifw: IfwRuleStore, user_id: u32) -> Self {
        Self {
            pm: PackageManagerControl::new(shell, user_id),
            ifw,
        }
    }

    pub fn ifw(&self) -> &IfwRuleStore {
        &self.ifw
    }

    pub fn pm(&self) -> &PackageManagerControl {
        &self.pm
    }

    /// Bring a component to `enabled` (true = enabled / unblocked)
    pub async fn switch_component(
        &self,
        method: ControllerMethod,
        component: &Component,
        enabled: bool,
    ) -> Result<(), ControlError> {
        match method {
            ControllerMethod::PackageManager => self.pm.switch(component, enabled).await,
            ControllerMethod::IntentFirewall if enabled => self.ifw.unblock(component).await,
            ControllerMethod::IntentFirewall => self.ifw.block(component).await,
        }
    }

    pub async fn enable(
        &self,
        method: ControllerMethod,
        component: &Component,
    ) -> Result<(), ControlError> {
        self.switch_component(method, component, true).await
    }

    pub async fn disable(
        &self,
        method: ControllerMethod,
        component: &Component,
    ) -> Result<(), ControlError> {
        self.switch_component(method, component, false).await
    }

    /// Effective state through the same mechanism that would set it
    pub async fn get_component_state(
        &self,
        method: ControllerMethod,
        component: &Component,
    ) -> Result<bool, ControlError> {
        match method {
            ControllerMethod::PackageManager => self.pm.is_enabled(component).await,
            ControllerMethod::IntentFirewall => {
                self.ifw.is_blocked(component).await.map(|blocked| !blocked)
            }
        }
    }

    /// Switch many components, counting successes and failures
    ///
    /// With the intent firewall, components of one package are written in a
    /// single document update; if that update fails, all of them count as failed.
    pub async fn switch_components(
        &self,
        method: ControllerMethod,
        components: &[Component],
        enabled: bool,
    ) -> RuleApplyResult {
        let mut tally = ApplyTally::new();
        match method {
            ControllerMethod::PackageManager => {
                for component in components {
                    match self.pm.switch(component, enabled).await {
                        Ok(()) => tally.succeed(1),
                        Err(err) => {
                            log::error!("Failed to switch {component}: {err}");
                            tally.fail(1);
                        }
                    }
                }
            }
            ControllerMethod::IntentFirewall => {
                for (package_name, group) in group_by_package(components) {
                    let result = if enabled {
                        self.ifw.unblock_all(&package_name, &group).await
                    } else {
                        self.ifw.block_all(&package_name, &group).await
                    };
                    match result {
                        Ok(_) => tally.succeed(group.len()),
                        Err(err) => {
                            log::error!(
                                "Failed to update IFW rules of {package_name} ({} components): {err}",
                                group.len()
                            );
                            tally.fail(group.len());
                        }
                    }
                }
            }
        }
        tally.finish()
    }
}

/// Group components by package, keeping first-seen package order and item order
fn group_by_package(components: &[Component]) -> Vec<(String, Vec<Component>)> {
    let mut groups: Vec<(String, Vec<Component>)> = Vec::new();
    for component in components {
        match groups
            .iter_mut()
            .find(|(package_name, _)| *package_name == component.package_name)
        {
            Some((_, group)) => group.push(component.clone()),
            None => groups.push((component.package_name.clone(), vec![component.clone()])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ifw::{IfwFileSystem, LocalFileSystem},
        model::ComponentType,
        shell::{CommandOutput, MockPrivilegedShell},
    };
    use std::{
        collections::HashSet,
        sync::Mutex,
    };
    use tempfile::TempDir;

    /// Shell that tracks pm state for any component and answers dumpsys from it
    fn fake_device() -> MockPrivilegedShell {
        let disabled: Arc<Mutex<HashSet<String>>> = Arc::default();
        let mut shell = MockPrivilegedShell::new();
        shell.expect_run_command().returning(move |cmd| {
            let mut disabled = disabled.lock().unwrap();
            let words: Vec<&str> = cmd.split_whitespace().collect();
            match words.as_slice() {
                ["pm", verb, "--user", _, flat] => {
                    let (_, class) = flat.split_once('/').unwrap();
                    if *verb == "disable" {
                        disabled.insert(class.to_string());
                    } else {
                        disabled.remove(class);
                    }
                    Ok(CommandOutput::default())
                }
                ["dumpsys", "package", _] => {
                    let mut stdout = String::from("    User 0: installed=true\n      disabledComponents:\n");
                    for class in disabled.iter() {
                        stdout.push_str(&format!("        {class}\n"));
                    }
                    Ok(CommandOutput {
                        stdout,
                        ..Default::default()
                    })
                }
                _ => panic!("unexpected command {cmd}"),
            }
        });
        shell
    }

    fn controller() -> (TempDir, ComponentController) {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn IfwFileSystem> = Arc::new(LocalFileSystem::new(dir.path()));
        let controller =
            ComponentController::new(Arc::new(fake_device()), IfwRuleStore::new(fs), 0);
        (dir, controller)
    }

    fn receiver(package_name: &str, name: &str) -> Component {
        Component::new(package_name, name, ComponentType::Receiver)
    }

    #[tokio::test]
    async fn pm_and_ifw_states_are_independent() {
        let (_dir, controller) = controller();
        let component = receiver("pkg.a", "pkg.a.Receiver");

        controller
            .disable(ControllerMethod::IntentFirewall, &component)
            .await
            .unwrap();
        assert!(
            !controller
                .get_component_state(ControllerMethod::IntentFirewall, &component)
                .await
                .unwrap()
        );
        assert!(
            controller
                .get_component_state(ControllerMethod::PackageManager, &component)
                .await
                .unwrap()
        );

        controller
            .disable(ControllerMethod::PackageManager, &component)
            .await
            .unwrap();
        controller
            .enable(ControllerMethod::IntentFirewall, &component)
            .await
            .unwrap();
        assert!(
            controller
                .get_component_state(ControllerMethod::IntentFirewall, &component)
                .await
                .unwrap()
        );
        assert!(
            !controller
                .get_component_state(ControllerMethod::PackageManager, &component)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn applying_same_state_twice_is_not_an_error() {
        let (_dir, controller) = controller();
        let component = receiver("pkg.a", "pkg.a.Receiver");
        for method in [ControllerMethod::PackageManager, ControllerMethod::IntentFirewall] {
            controller.disable(method, &component).await.unwrap();
            controller.disable(method, &component).await.unwrap();
            assert!(!controller.get_component_state(method, &component).await.unwrap());
        }
    }

    #[tokio::test]
    async fn bulk_ifw_spans_packages() {
        let (_dir, controller) = controller();
        let components = vec![
            receiver("pkg.a", "pkg.a.One"),
            receiver("pkg.b", "pkg.b.One"),
            receiver("pkg.a", "pkg.a.Two"),
        ];

        let result = controller
            .switch_components(ControllerMethod::IntentFirewall, &components, false)
            .await;
        assert!(result.is_succeeded());
        assert_eq!(result.succeed_count(), 3);
        assert_eq!(controller.ifw().blocked_components("pkg.a").await.unwrap().len(), 2);
        assert_eq!(controller.ifw().blocked_components("pkg.b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bulk_pm_counts_each_component() {
        let (_dir, controller) = controller();
        let components = vec![receiver("pkg.a", "pkg.a.One"), receiver("pkg.a", "pkg.a.Two")];
        let result = controller
            .switch_components(ControllerMethod::PackageManager, &components, false)
            .await;
        assert_eq!(result.succeed_count(), 2);
        assert_eq!(result.failed_count(), 0);
    }

    #[test]
    fn grouping_keeps_first_seen_order() {
        let groups = group_by_package(&[
            receiver("pkg.b", "pkg.b.One"),
            receiver("pkg.a", "pkg.a.One"),
            receiver("pkg.b", "pkg.b.Two"),
        ]);
        let packages: Vec<&str> = groups.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(packages, ["pkg.b", "pkg.a"]);
        assert_eq!(groups[0].1.len(), 2);
    }
}
