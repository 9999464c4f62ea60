pub mod monitoring;
pub mod openshift;
pub mod status;
pub mod v1alpha1;
pub mod v1beta1;
