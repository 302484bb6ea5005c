use kube::CustomResourceExt;
use operator::crd::{Config, Connectivity, ImageRequest, Topology};

/// Print all CRD manifests, ready for `kubectl apply -f -`.
fn main() -> anyhow::Result<()> {
    let crds = [
        serde_yaml::to_string(&Topology::crd())?,
        serde_yaml::to_string(&Connectivity::crd())?,
        serde_yaml::to_string(&Config::crd())?,
        serde_yaml::to_string(&ImageRequest::crd())?,
    ];
    print!("{}", crds.join("---\n"));
    Ok(())
}
