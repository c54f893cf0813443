//! Build script for sidecar-core
//!
//! Links the prebuilt native encoder libraries when the `native` feature is
//! enabled. Point `SIDECAR_NATIVE_LIB_DIR` at the directory holding the encoder
//! shim (`libencoder_shim`), `libmtmd` (clip) and `libwhisper`, plus `libggml*`.

fn main() {
    println!("cargo:rerun-if-env-changed=SIDECAR_NATIVE_LIB_DIR");

    #[cfg(feature = "native")]
    link_native_libs();
}

#[cfg(feature = "native")]
fn link_native_libs() {
    use std::env;
    use std::path::Path;

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    match env::var("SIDECAR_NATIVE_LIB_DIR") {
        Ok(dir) if Path::new(&dir).is_dir() => {
            println!("cargo:rustc-link-search=native={}", dir);
            println!("cargo:rustc-link-search=native={}/lib", dir);
        }
        Ok(dir) => {
            println!(
                "cargo:warning=SIDECAR_NATIVE_LIB_DIR={} is not a directory; relying on system search paths",
                dir
            );
        }
        Err(_) => {
            println!(
                "cargo:warning=SIDECAR_NATIVE_LIB_DIR not set; relying on system search paths"
            );
        }
    }

    println!("cargo:rustc-link-lib=static=encoder_shim");
    println!("cargo:rustc-link-lib=static=mtmd");
    println!("cargo:rustc-link-lib=static=whisper");
    println!("cargo:rustc-link-lib=static=ggml");
    println!("cargo:rustc-link-lib=static=ggml-base");
    println!("cargo:rustc-link-lib=static=ggml-cpu");

    match target_os.as_str() {
        "android" => {
            println!("cargo:rustc-link-lib=c++_shared");
            println!("cargo:rustc-link-lib=log");
        }
        "linux" => {
            println!("cargo:rustc-link-lib=stdc++");
            println!("cargo:rustc-link-lib=pthread");
        }
        "macos" | "ios" => {
            println!("cargo:rustc-link-lib=c++");
            println!("cargo:rustc-link-lib=framework=Accelerate");
            println!("cargo:rustc-link-lib=framework=Metal");
            println!("cargo:rustc-link-lib=framework=Foundation");
            println!("cargo:rustc-link-lib=static=ggml-metal");
        }
        _ => {}
    }
}
