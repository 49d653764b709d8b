fn main() {
    // ESP-IDF builds need the sysenv exported for linking; host test
    // builds skip it entirely.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
