use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=ROCM_PATH");

    // HIP libraries are only needed for the real GPU device
    if env::var_os("CARGO_FEATURE_ROCM").is_none() {
        return;
    }

    let rocm_root = env::var("ROCM_PATH").unwrap_or_else(|_| "/opt/rocm".to_string());
    println!("cargo:rustc-link-search=native={}/lib", rocm_root);
    println!("cargo:rustc-link-lib=dylib=amdhip64");
}
