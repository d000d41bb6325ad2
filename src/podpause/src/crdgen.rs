use kube::CustomResourceExt;
use podpause::model::ResumeProfile;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&ResumeProfile::crd())?);
    Ok(())
}
