use std::collections::BTreeMap;

pub const APP_LABEL: &str = "app";
pub const COMPONENT_LABEL: &str = "threescale_component";
pub const COMPONENT_ELEMENT_LABEL: &str = "threescale_component_element";
pub const DEPLOYMENT_LABEL: &str = "deployment";

pub const PRODUCT_NAME: &str = "3scale-amp2";

/// Pod template labels put there by releases before the `rht.*` metering
/// labels were introduced.
pub const OBSOLETE_METERING_LABELS: [&str; 5] = [
    "com.redhat.product-name",
    "com.redhat.component-type",
    "com.redhat.product-version",
    "com.redhat.component-version",
    "com.redhat.component-name",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubcomponentType {
    Application,
    Infrastructure,
}

impl SubcomponentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubcomponentType::Application => "application",
            SubcomponentType::Infrastructure => "infrastructure",
        }
    }
}

pub fn get_component_labels(app: &str, component: &str, element: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_owned(), app.to_owned()),
        (COMPONENT_LABEL.to_owned(), component.to_owned()),
        (COMPONENT_ELEMENT_LABEL.to_owned(), element.to_owned()),
    ])
}

pub fn get_selector_labels(deployment: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(DEPLOYMENT_LABEL.to_owned(), deployment.to_owned())])
}

pub fn get_metering_labels(
    component: &str,
    subcomponent: &str,
    version: &str,
    subcomponent_type: SubcomponentType,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("rht.prod_name".to_owned(), PRODUCT_NAME.to_owned()),
        ("rht.prod_ver".to_owned(), version.to_owned()),
        ("rht.comp".to_owned(), component.to_owned()),
        ("rht.comp_ver".to_owned(), version.to_owned()),
        ("rht.subcomp".to_owned(), subcomponent.to_owned()),
        ("rht.subcomp_t".to_owned(), subcomponent_type.as_str().to_owned()),
    ])
}
