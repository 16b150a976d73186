//! Template fuzz target: feed arbitrary bytes to the template loader and, when they load,
//! run a few generation cycles with the general-purpose function set registered.
//! Loading and generation must not panic; they return Ok or a protoforge::Error.
//! Build with: cargo fuzz run template_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use rand::SeedableRng;

    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let doc = match protoforge::parse(s) {
        Ok(doc) => doc,
        Err(_) => return,
    };
    let mut registry = protoforge::FunctionRegistry::new();
    if protoforge::builtins::register(&mut registry).is_err() {
        return;
    }
    let mut generator = match protoforge::Generator::new(doc, registry) {
        Ok(g) => g,
        Err(_) => return,
    };
    let mut rng = rand::rngs::StdRng::seed_from_u64(data.len() as u64);
    for _ in 0..4 {
        let _ = generator.generate(&mut rng);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run template_fuzz");
}
