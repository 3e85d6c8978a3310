use serde::Serialize;
use std::collections::HashMap;

/// Integer percentage with half-away-from-zero rounding; 0 when the
/// denominator is 0 rather than NaN.
pub fn percent(numer: i64, denom: i64) -> i64 {
    if denom == 0 {
        return 0;
    }
    ((numer as f64 / denom as f64) * 100.0).round() as i64
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub session_date: String,
    pub session_time: String,
}

#[derive(Debug, Clone)]
pub struct CourseAttendanceRow {
    pub session_id: String,
    pub student_id: String,
    pub student_name: String,
    pub email: String,
    pub roll_number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBreakdown {
    pub session_id: String,
    pub session_date: String,
    pub session_time: String,
    pub students_present: i64,
    pub attendance_rate: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentBreakdown {
    pub student_id: String,
    pub name: String,
    pub email: String,
    pub roll_number: Option<String>,
    pub attended: i64,
    pub percentage: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStats {
    pub total_sessions: i64,
    pub total_students_attended: i64,
    pub overall_attendance_rate: i64,
    pub sessions_breakdown: Vec<SessionBreakdown>,
    pub students_breakdown: Vec<StudentBreakdown>,
}

/// Course-level aggregation. `sessions` arrives in display order (date/time
/// descending) and the breakdown preserves it.
///
/// There is no enrollment roster: the per-session rate denominator is the
/// distinct set of students who have ever marked attendance anywhere in the
/// course, so a student with zero marks is invisible here.
pub fn course_stats(sessions: &[SessionRow], records: &[CourseAttendanceRow]) -> CourseStats {
    let total_sessions = sessions.len() as i64;

    let mut present_by_session: HashMap<&str, i64> = HashMap::new();
    let mut by_student: HashMap<&str, (i64, &CourseAttendanceRow)> = HashMap::new();
    for rec in records {
        *present_by_session.entry(rec.session_id.as_str()).or_insert(0) += 1;
        by_student
            .entry(rec.student_id.as_str())
            .and_modify(|(n, _)| *n += 1)
            .or_insert((1, rec));
    }
    let total_students_attended = by_student.len() as i64;

    let sessions_breakdown = sessions
        .iter()
        .map(|s| {
            let students_present = present_by_session.get(s.id.as_str()).copied().unwrap_or(0);
            SessionBreakdown {
                session_id: s.id.clone(),
                session_date: s.session_date.clone(),
                session_time: s.session_time.clone(),
                students_present,
                attendance_rate: percent(students_present, total_students_attended),
            }
        })
        .collect();

    let mut students_breakdown: Vec<StudentBreakdown> = by_student
        .values()
        .map(|(attended, rec)| StudentBreakdown {
            student_id: rec.student_id.clone(),
            name: rec.student_name.clone(),
            email: rec.email.clone(),
            roll_number: rec.roll_number.clone(),
            attended: *attended,
            percentage: percent(*attended, total_sessions),
        })
        .collect();
    students_breakdown.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.student_id.cmp(&b.student_id)));

    let total_records = records.len() as i64;
    let overall_attendance_rate = percent(total_records, total_sessions * total_students_attended);

    CourseStats {
        total_sessions,
        total_students_attended,
        overall_attendance_rate,
        sessions_breakdown,
        students_breakdown,
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentTotals {
    pub total_sessions: i64,
    pub sessions_attended: i64,
    pub sessions_missed: i64,
    pub attendance_percentage: i64,
}

/// Missed sessions are inferred by subtraction; only "present" rows are ever
/// stored. `attended` cannot exceed `total_sessions` while the at-most-once
/// constraint holds.
pub fn student_totals(total_sessions: i64, sessions_attended: i64) -> StudentTotals {
    StudentTotals {
        total_sessions,
        sessions_attended,
        sessions_missed: total_sessions - sessions_attended,
        attendance_percentage: percent(sessions_attended, total_sessions),
    }
}
