//! Human-readable output for one-shot scans.

use std::fmt::Write;

use cameradar_core::stream::Stream;

/// Render streams the way an operator reads them: one block per device,
/// then a one-line verdict.
pub fn render(streams: &[Stream]) -> String {
    let mut out = String::new();
    if streams.is_empty() {
        out.push_str(
            "\u{2716} No streams were found. Please make sure that your target is on an accessible network.\n",
        );
        return out;
    }

    for stream in streams {
        if stream.is_accessed() {
            let _ = writeln!(out, "\tDevice RTSP URL:\t{}", stream.rtsp_url());
        } else {
            let _ = writeln!(
                out,
                "\tAdmin panel URL:\t{} You can use this URL to try attacking the camera's admin panel instead.",
                stream.admin_panel_url()
            );
        }
        let _ = writeln!(out, "\tDevice model:\t\t{}\n", stream.device);
        let _ = writeln!(out, "\tIP address:\t\t{}", stream.address);
        let _ = writeln!(out, "\tRTSP port:\t\t{}", stream.port);
        if stream.credentials_found {
            let _ = writeln!(out, "\tUsername:\t\t{}", stream.username);
            let _ = writeln!(out, "\tPassword:\t\t{}", stream.password);
        } else {
            out.push_str("\tUsername:\t\tnot found\n\tPassword:\t\tnot found\n");
        }
        if stream.route_found {
            let _ = writeln!(out, "\tRTSP route:\t\t/{}\n\n", stream.route.trim_start_matches('/'));
        } else {
            out.push_str("\tRTSP route:\t\tnot found\n\n\n");
        }
    }

    match streams.iter().filter(|s| s.is_accessed()).count() {
        0 => out.push_str(
            "\u{2716} Streams were found but none were accessed. They are most likely configured \
             with secure credentials and routes. You can try adding entries to the dictionary or \
             generating your own in order to attempt a bruteforce attack on the cameras.\n",
        ),
        1 => out.push_str("\u{2714} Successful attack: 1 device was accessed\n"),
        n => {
            let _ = writeln!(out, "\u{2714} Successful attack: {n} devices were accessed");
        }
    }
    out
}
