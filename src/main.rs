#[cfg(target_os = "espidf")]
mod firmware;
#[cfg(not(target_os = "espidf"))]
mod simulator;

#[cfg(target_os = "espidf")]
fn main() {
    firmware::main();
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    if let Err(e) = simulator::run() {
        log::error!("Simulator error: {:#}", e);
        std::process::exit(1);
    }
}
