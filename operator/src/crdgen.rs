use kube::CustomResourceExt;

fn main() {
    println!("---");
    print!("{}", serde_yaml::to_string(&controller::CodeServer::crd()).unwrap());
    println!("---");
    print!(
        "{}",
        serde_yaml::to_string(&controller::CodeServerDeployment::crd()).unwrap()
    );
}
