use super::bundle::RuleBundle;
use crate::{
    apply::ComponentCatalog,
    controller::ComponentController,
    error::ControlError,
    ifw::IfwRuleDocument,
    model::{Component, ComponentRule, ControllerMethod},
};

/// Turn a raw intent firewall file into a bundle of IFW block rules for `package_name`
///
/// Unlike the rule store, a file that cannot be parsed is an error here.
/// Entries naming other packages are dropped.
pub fn bundle_from_ifw_xml(package_name: &str, content: &str) -> Result<RuleBundle, ControlError> {
    let document = IfwRuleDocument::from_xml(package_name, content)?;
    let mut bundle = RuleBundle::new(package_name);
    for component in document.components() {
        if component.package_name != package_name {
            log::debug!("Ignoring IFW entry {component} outside of {package_name}");
            continue;
        }
        bundle.components.push(ComponentRule::from_component(
            &component,
            false,
            ControllerMethod::IntentFirewall,
        ));
    }
    Ok(bundle)
}

/// Snapshot the PM and IFW state of each of `components`
///
/// Every component yields one rule per controller method, whatever its state,
/// so importing the bundle restores the package exactly.
pub async fn export_package(
    controller: &ComponentController,
    package_name: &str,
    components: &[Component],
) -> Result<RuleBundle, ControlError> {
    log::info!("Exporting rules of {package_name}");
    let disabled = controller.pm().disabled_components(package_name).await?;

    let mut bundle = RuleBundle::new(package_name);
    for component in components
        .iter()
        .filter(|component| component.package_name == package_name)
    {
        let unblocked = !controller.ifw().is_blocked(component).await?;
        bundle.components.push(ComponentRule::from_component(
            component,
            unblocked,
            ControllerMethod::IntentFirewall,
        ));
        bundle.components.push(ComponentRule::from_component(
            component,
            !disabled.contains(&component.name),
            ControllerMethod::PackageManager,
        ));
    }
    Ok(bundle)
}

/// Snapshot every component the catalog knows for `package_name`
///
/// Components blocked by the intent firewall are included even when the catalog
/// cannot enumerate them.
pub async fn export_declared(
    controller: &ComponentController,
    catalog: &dyn ComponentCatalog,
    package_name: &str,
) -> Result<RuleBundle, ControlError> {
    let mut components = catalog.components(package_name).await?;
    for blocked in controller.ifw().blocked_components(package_name).await? {
        if !components.contains(&blocked) {
            components.push(blocked);
        }
    }
    export_package(controller, package_name, &components).await
}

/// Bundle of the components currently blocked by the intent firewall
pub async fn export_ifw_blocks(
    controller: &ComponentController,
    package_name: &str,
) -> Result<RuleBundle, ControlError> {
    let mut bundle = RuleBundle::new(package_name);
    bundle.components = controller
        .ifw()
        .blocked_components(package_name)
        .await?
        .iter()
        .map(|component| {
            ComponentRule::from_component(component, false, ControllerMethod::IntentFirewall)
        })
        .collect();
    Ok(bundle)
}
