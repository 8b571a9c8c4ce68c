fn main() {
    // Host builds (tests, simulation) have no ESP-IDF environment to forward.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
