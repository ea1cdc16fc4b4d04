//! Prints the Hibernator CustomResourceDefinition as YAML.
//!
//! `cargo run -p crds --bin crdgen > config/crd/hibernator.yaml`

use crds::Hibernator;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&Hibernator::crd())?);
    Ok(())
}
