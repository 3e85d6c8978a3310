use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::courses::owned_course;
use crate::ipc::types::{AppState, Request};
use crate::window;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn query_failed(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message: message.into(),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

fn get_duration(params: &serde_json::Value) -> Result<Option<i64>, HandlerErr> {
    match params.get("durationMinutes") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| bad_params("durationMinutes must be an integer")),
    }
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub course_id: String,
    pub session_date: String,
    pub session_time: String,
    pub duration_minutes: Option<i64>,
    pub qr_code: String,
    pub created_at: String,
}

impl SessionRow {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "courseId": self.course_id,
            "sessionDate": self.session_date,
            "sessionTime": self.session_time,
            "durationMinutes": self.duration_minutes,
            "qrCode": self.qr_code,
            "createdAt": self.created_at
        })
    }
}

fn session_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: r.get(0)?,
        course_id: r.get(1)?,
        session_date: r.get(2)?,
        session_time: r.get(3)?,
        duration_minutes: r.get(4)?,
        qr_code: r.get(5)?,
        created_at: r.get(6)?,
    })
}

const SESSION_COLS: &str =
    "id, course_id, session_date, session_time, duration_minutes, qr_code, created_at";

pub fn find_session_by_token(conn: &Connection, token: &str) -> rusqlite::Result<Option<SessionRow>> {
    conn.query_row(
        &format!("SELECT {} FROM sessions WHERE qr_code = ?", SESSION_COLS),
        [token],
        |r| session_from_row(r),
    )
    .optional()
}

fn sessions_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let session_date = get_required_str(params, "sessionDate")?;
    let session_time = get_required_str(params, "sessionTime")?;
    let duration_minutes = get_duration(params)?;

    // Also validates the three fields before anything is written.
    window::session_window(&session_date, &session_time, duration_minutes)
        .map_err(|e| bad_params(e.message))?;

    owned_course(conn, &course_id, &teacher_id).map_err(|(code, message)| HandlerErr {
        code,
        message,
        details: None,
    })?;

    // Course-scoped prefix plus a random component; unique but unsigned,
    // so the raw token is a bearer credential.
    let qr_code = format!("session_{}_{}", course_id, Uuid::new_v4());
    let session_id = Uuid::new_v4().to_string();
    let created_at = db::now_stamp();

    conn.execute(
        "INSERT INTO sessions(id, course_id, session_date, session_time, duration_minutes, qr_code, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &session_id,
            &course_id,
            &session_date,
            &session_time,
            &duration_minutes,
            &qr_code,
            &created_at,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "sessions" })),
    })?;

    let session = SessionRow {
        id: session_id,
        course_id,
        session_date,
        session_time,
        duration_minutes,
        qr_code,
        created_at,
    };
    Ok(json!({ "session": session.to_json() }))
}

fn sessions_list_for_course(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM sessions
             WHERE course_id = ?
             ORDER BY session_date DESC, session_time DESC",
            SESSION_COLS
        ))
        .map_err(query_failed)?;
    let sessions = stmt
        .query_map([&course_id], |r| session_from_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({
        "sessions": sessions.iter().map(SessionRow::to_json).collect::<Vec<_>>()
    }))
}

fn sessions_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let row = conn
        .query_row(
            "SELECT s.id, s.course_id, s.session_date, s.session_time, s.duration_minutes,
                    s.qr_code, s.created_at, c.course_name, c.course_code
             FROM sessions s
             JOIN courses c ON s.course_id = c.id
             WHERE s.id = ?",
            [&session_id],
            |r| {
                let session = session_from_row(r)?;
                let course_name: String = r.get(7)?;
                let course_code: String = r.get(8)?;
                Ok((session, course_name, course_code))
            },
        )
        .optional()
        .map_err(query_failed)?;

    let Some((session, course_name, course_code)) = row else {
        return Err(HandlerErr {
            code: "not_found",
            message: "session not found".to_string(),
            details: None,
        });
    };
    let mut out = session.to_json();
    out["courseName"] = json!(course_name);
    out["courseCode"] = json!(course_code);
    Ok(json!({ "session": out }))
}

/// Session lookup joined with its course's owner, for the ownership gate.
fn owned_session(
    conn: &Connection,
    session_id: &str,
    teacher_id: &str,
) -> Result<SessionRow, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT s.id, s.course_id, s.session_date, s.session_time, s.duration_minutes,
                    s.qr_code, s.created_at, c.teacher_id
             FROM sessions s
             JOIN courses c ON s.course_id = c.id
             WHERE s.id = ?",
            [session_id],
            |r| {
                let session = session_from_row(r)?;
                let owner: String = r.get(7)?;
                Ok((session, owner))
            },
        )
        .optional()
        .map_err(query_failed)?;

    let Some((session, owner)) = row else {
        return Err(HandlerErr {
            code: "not_found",
            message: "session not found".to_string(),
            details: None,
        });
    };
    if owner != teacher_id {
        return Err(HandlerErr {
            code: "not_authorized",
            message: "not authorized for this session".to_string(),
            details: None,
        });
    }
    Ok(session)
}

fn sessions_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let session_date = get_required_str(params, "sessionDate")?;
    let session_time = get_required_str(params, "sessionTime")?;
    let duration_minutes = get_duration(params)?;

    window::session_window(&session_date, &session_time, duration_minutes)
        .map_err(|e| bad_params(e.message))?;

    let mut session = owned_session(conn, &session_id, &teacher_id)?;

    // The QR token never changes across reschedules; already-printed codes
    // stay scannable.
    conn.execute(
        "UPDATE sessions SET session_date = ?, session_time = ?, duration_minutes = ? WHERE id = ?",
        (&session_date, &session_time, &duration_minutes, &session_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "sessions" })),
    })?;

    session.session_date = session_date;
    session.session_time = session_time;
    session.duration_minutes = duration_minutes;
    Ok(json!({ "session": session.to_json() }))
}

fn sessions_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let teacher_id = get_required_str(params, "teacherId")?;

    owned_session(conn, &session_id, &teacher_id)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    if let Err(e) = tx.execute("DELETE FROM attendance WHERE session_id = ?", [&session_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance" })),
        });
    }
    if let Err(e) = tx.execute("DELETE FROM sessions WHERE id = ?", [&session_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "sessions" })),
        });
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "ok": true }))
}

fn with_conn(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.create" => Some(with_conn(state, req, sessions_create)),
        "sessions.listForCourse" => Some(with_conn(state, req, sessions_list_for_course)),
        "sessions.get" => Some(with_conn(state, req, sessions_get)),
        "sessions.update" => Some(with_conn(state, req, sessions_update)),
        "sessions.delete" => Some(with_conn(state, req, sessions_delete)),
        _ => None,
    }
}
