//! Plain-text rendering of API data and wizard state.

use presence_api::models::{
    AttendanceRecord, AttendanceStats, RegistrationStatus, TodayAttendance,
};
use presence_core::{CaptureFeedback, CaptureStatus, FeedbackDetail, Identity, WizardSnapshot};
use presence_hw::DeviceInfo;
use std::fmt::Write;

pub fn identity(user: &Identity) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", user.name, user.role);
    let _ = writeln!(out, "  id:     {}", user.id);
    if let Some(email) = &user.email {
        let _ = writeln!(out, "  email:  {email}");
    }
    let _ = writeln!(out, "  active: {}", yes_no(user.is_active));
    let face = if user.is_face_registered {
        "registered"
    } else {
        "not registered"
    };
    let _ = writeln!(out, "  face:   {face}");
    out
}

pub fn users(users: &[Identity]) -> String {
    if users.is_empty() {
        return "No users found.\n".to_string();
    }
    let mut out = format!(
        "{:<8} {:<24} {:<28} {:<8} {:<6} {}\n",
        "ID", "NAME", "EMAIL", "ROLE", "ACTIVE", "FACE"
    );
    for user in users {
        let _ = writeln!(
            out,
            "{:<8} {:<24} {:<28} {:<8} {:<6} {}",
            user.id,
            truncate(&user.name, 24),
            truncate(user.email.as_deref().unwrap_or("-"), 28),
            user.role,
            yes_no(user.is_active),
            if user.is_face_registered { "yes" } else { "no" },
        );
    }
    out
}

pub fn records(records: &[AttendanceRecord]) -> String {
    if records.is_empty() {
        return "No attendance records.\n".to_string();
    }
    let mut out = format!(
        "{:<10} {:<8} {:<24} {:<8} {}\n",
        "DATE", "TIME", "NAME", "STATUS", "CONFIDENCE"
    );
    for record in records {
        let confidence = record
            .confidence
            .map(|c| format!("{:.0}%", c * 100.0))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<10} {:<8} {:<24} {:<8} {}",
            record.date,
            clock(&record.time),
            truncate(record.user_name.as_deref().unwrap_or(&record.user_id), 24),
            record.status,
            confidence,
        );
    }
    out
}

pub fn dashboard(today: &TodayAttendance, stats: &AttendanceStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Today ({}): {} present", today.date, today.total_present);
    out.push_str(&records(&today.attendance));
    out.push('\n');
    let _ = writeln!(
        out,
        "Last {} days ({} to {})",
        stats.period.total_days, stats.period.start_date, stats.period.end_date
    );
    let _ = writeln!(out, "  present: {}", stats.stats.present_days);
    let _ = writeln!(out, "  absent:  {}", stats.stats.absent_days);
    let _ = writeln!(out, "  rate:    {:.1}%", stats.stats.attendance_rate);
    out
}

pub fn registration_status(status: &RegistrationStatus) -> String {
    let mut out = String::new();
    let name = status.user_name.as_deref().unwrap_or(&status.user_id);
    let _ = writeln!(out, "Face registration for {name}");
    let _ = writeln!(
        out,
        "  encodings: {} ({} saved, {} pending)",
        status.face_encodings_count, status.saved_encodings_count, status.temp_encodings_count
    );
    let _ = writeln!(out, "  progress:  {:.0}%", status.progress);
    if status.registration_complete {
        let _ = writeln!(out, "  complete");
    } else {
        let _ = writeln!(out, "  {} more image(s) needed", status.remaining_images);
    }
    out
}

pub fn feedback(feedback: &CaptureFeedback) -> String {
    let mut out = format!("{}\n", feedback.message);
    match &feedback.detail {
        FeedbackDetail::Registration { stored: Some(n), complete } => {
            let _ = writeln!(
                out,
                "  stored encodings: {n}{}",
                if *complete { " (registration complete)" } else { "" }
            );
        }
        FeedbackDetail::Recognition {
            identity: Some(user),
            confidence,
            ..
        } => {
            let _ = writeln!(
                out,
                "  {} ({}), confidence {:.0}%",
                user.name,
                user.role,
                confidence * 100.0
            );
        }
        _ => {}
    }
    out
}

/// One status block for the interactive enrollment loop.
pub fn wizard(snapshot: &WizardSnapshot) -> String {
    let mut out = String::new();
    let status = match snapshot.status {
        CaptureStatus::Idle => "ready",
        CaptureStatus::Processing => "processing",
        CaptureStatus::Success => "success",
        CaptureStatus::Error => "error",
    };
    let _ = writeln!(
        out,
        "[{}/{}] {}",
        snapshot.step + 1,
        snapshot.prompt_count,
        snapshot.prompt
    );
    let _ = writeln!(
        out,
        "  status: {status}  camera: {}  samples: {}/{} ({}%)",
        if snapshot.camera_active { "on" } else { "off" },
        snapshot.sample_count(),
        snapshot.min_samples,
        snapshot.progress_percent(),
    );
    if !snapshot.sample_ids.is_empty() {
        let ids: Vec<String> = snapshot.sample_ids.iter().map(|id| id.to_string()).collect();
        let _ = writeln!(out, "  ids: {}", ids.join(" "));
    }
    if let Some(err) = &snapshot.last_error {
        let _ = writeln!(out, "  ! {err}");
    }
    if snapshot.can_finalize() {
        let _ = writeln!(out, "  enough samples: press f to register");
    }
    out
}

pub fn devices(devices: &[DeviceInfo]) -> String {
    if devices.is_empty() {
        return "No video capture devices found.\n".to_string();
    }
    let mut out = String::new();
    for dev in devices {
        let _ = writeln!(out, "{:<14} {} [{}] {}", dev.path, dev.name, dev.driver, dev.bus);
    }
    out
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// `08:01:22.512000` → `08:01:22`
fn clock(time: &str) -> &str {
    time.split('.').next().unwrap_or(time)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
