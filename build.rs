fn main() {
    // ESP-IDF environment is only needed for the Xtensa firmware build; host builds
    // and tests skip it. TARGET is set by cargo for build scripts.
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.contains("xtensa") {
        embuild::espidf::sysenv::output();
    }
}
