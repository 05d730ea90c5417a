use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!(
        "{}",
        serde_yaml::to_string(&elaservice_controller::resources::elafros::ElaService::crd())?
    );
    Ok(())
}
