//! Print the MemberCluster CRD

use kube::CustomResourceExt;
use meridian_common::crd::MemberCluster;

use crate::Result;

/// Write the CRD as YAML to stdout
pub fn run() -> Result<()> {
    print!("{}", serde_yaml::to_string(&MemberCluster::crd())?);
    Ok(())
}
