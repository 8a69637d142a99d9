//! Build-time hints for locating FFmpeg on Windows.
//!
//! `ffmpeg-sys-next` does the actual discovery; this only warns early when
//! the environment is unlikely to let it succeed.

use std::{env, path::PathBuf};

const WATCHED_VARIABLES: [&str; 4] = ["FFMPEG_DIR", "VCPKG_ROOT", "VCPKGRS_DYNAMIC", "VCPKGRS_TRIPLET"];

fn main() {
    for variable in WATCHED_VARIABLES {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    let windows = env::var("CARGO_CFG_TARGET_OS").is_ok_and(|os| os == "windows");
    if !windows || env::var_os("FFMPEG_DIR").is_some() {
        return;
    }

    let Some(vcpkg_root) = env::var_os("VCPKG_ROOT") else {
        println!("cargo:warning=framedex: FFMPEG_DIR is not set; install FFmpeg via vcpkg and set VCPKG_ROOT or FFMPEG_DIR");
        return;
    };
    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let installed = PathBuf::from(vcpkg_root).join("installed").join(&triplet);

    if !installed.exists() {
        println!(
            "cargo:warning=framedex: no vcpkg FFmpeg for triplet {triplet} under {}",
            installed.display()
        );
        return;
    }
    println!(
        "cargo:warning=framedex: using vcpkg FFmpeg at {0}; set FFMPEG_DIR={0} to skip this lookup",
        installed.display()
    );
    if env::var_os("VCPKGRS_DYNAMIC").is_none() {
        println!("cargo:warning=framedex: set VCPKGRS_DYNAMIC=1 for dynamically linked vcpkg FFmpeg");
    }
}
