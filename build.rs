// This build script stamps build information into the binary so that
// `infrabin version` and the admin config dump can report it.
fn main() -> Result<(), anyhow::Error> {
    let rustc = rustc_version::version()?;
    println!("cargo:rustc-env=INFRABIN_BUILD_RUSTC_VERSION={rustc}");

    let revision = std::env::var("INFRABIN_GIT_REVISION").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=INFRABIN_BUILD_GIT_REVISION={revision}");
    let status = std::env::var("INFRABIN_BUILD_STATUS").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=INFRABIN_BUILD_STATUS={status}");

    println!("cargo:rerun-if-env-changed=INFRABIN_GIT_REVISION");
    println!("cargo:rerun-if-env-changed=INFRABIN_BUILD_STATUS");
    Ok(())
}
