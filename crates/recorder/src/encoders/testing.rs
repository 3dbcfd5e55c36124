use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Stand-in for ffmpeg: copies stdin to the last argument, then lingers `linger_secs`
pub(crate) fn fake_ffmpeg(dir: &Path, linger_secs: u32) -> PathBuf {
    let path = dir.join("fake-ffmpeg");
    let script = format!(
        "#!/bin/sh\nfor out; do :; done\ncat > \"$out\"\nsleep {linger_secs}\n"
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
