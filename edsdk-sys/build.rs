use std::env;
use std::path::PathBuf;

// These helper functions are only used when the edsdk feature is enabled
#[allow(dead_code)]
/// Print a boxed error message for visibility in cargo output
fn print_env_error(title: &str, details: &[&str], fixes: &[&str]) {
    eprintln!();
    eprintln!("╔══════════════════════════════════════════════════════════════════╗");
    eprintln!("║ EDSDK BUILD ERROR: {:<46} ║", title);
    eprintln!("╠══════════════════════════════════════════════════════════════════╣");
    for detail in details {
        eprintln!("║ {:<66} ║", detail);
    }
    eprintln!("╠══════════════════════════════════════════════════════════════════╣");
    eprintln!("║ HOW TO FIX:                                                      ║");
    for fix in fixes {
        eprintln!("║   {:<64} ║", fix);
    }
    eprintln!("╚══════════════════════════════════════════════════════════════════╝");
    eprintln!();
}

#[allow(dead_code)]
/// Library directory inside an EDSDK installation, by target platform.
fn library_dir(sdk_dir: &std::path::Path) -> PathBuf {
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    match target_os.as_str() {
        "windows" => sdk_dir.join("Library"),
        "macos" => sdk_dir.join("Framework"),
        _ => sdk_dir.join("Library"),
    }
}

#[allow(dead_code)]
/// Check for common EDSDK installation paths
fn find_edsdk() -> Option<PathBuf> {
    let candidates = [
        "C:\\EDSDK\\Windows\\EDSDK_64",
        "C:\\EDSDK\\EDSDK_64",
        "/opt/edsdk",
        "/usr/local/edsdk",
    ];

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|p| library_dir(p).exists())
}

fn main() {
    // Only emit link directives when the `edsdk` feature is enabled so the
    // constants in this crate stay usable without the SDK installed.
    #[cfg(feature = "edsdk")]
    {
        println!("cargo:rerun-if-env-changed=EDSDK_DIR");
        println!("cargo:rerun-if-env-changed=EDSDK_LIB_DIR");

        let lib_dir = match env::var("EDSDK_LIB_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let sdk_dir = match env::var("EDSDK_DIR") {
                    Ok(dir) => PathBuf::from(dir),
                    Err(_) => match find_edsdk() {
                        Some(found) => {
                            println!(
                                "cargo:warning=EDSDK_DIR not set, auto-detected: {}",
                                found.display()
                            );
                            found
                        }
                        None => {
                            print_env_error(
                                "EDSDK_DIR not set",
                                &["The edsdk feature requires the Canon EDSDK."],
                                &["export EDSDK_DIR=/path/to/EDSDK_64"],
                            );
                            panic!("EDSDK_DIR environment variable must be set when `edsdk` feature is enabled.");
                        }
                    },
                };
                library_dir(&sdk_dir)
            }
        };

        if !lib_dir.exists() {
            println!(
                "cargo:warning=EDSDK library path does not exist: {}",
                lib_dir.display()
            );
            println!("cargo:warning=Linker will search standard paths");
        }

        let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
        if target_os == "macos" {
            println!("cargo:rustc-link-search=framework={}", lib_dir.display());
            println!("cargo:rustc-link-lib=framework=EDSDK");
        } else {
            println!("cargo:rustc-link-search=native={}", lib_dir.display());
            println!("cargo:rustc-link-lib=dylib=EDSDK");
        }
    }
}
