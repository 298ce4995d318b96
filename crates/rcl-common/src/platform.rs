/// File names tried, in order, when loading the system OpenCL loader.
pub fn opencl_library_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["OpenCL.dll"]
    }
    #[cfg(target_os = "macos")]
    {
        &["/System/Library/Frameworks/OpenCL.framework/OpenCL"]
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        &["libOpenCL.so.1", "libOpenCL.so"]
    }
}

/// Returns the platform name string.
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "windows")]
    { "windows" }
    #[cfg(target_os = "linux")]
    { "linux" }
    #[cfg(target_os = "macos")]
    { "macos" }
    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    { "unknown" }
}
