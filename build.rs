fn main() {
    // The ESP-IDF environment is only needed for Xtensa firmware builds.
    // Host builds (simulator, unit tests) skip it entirely.
    if let Ok(target) = std::env::var("TARGET") {
        if target.contains("xtensa") {
            embuild::espidf::sysenv::output();
        }
    }
}
