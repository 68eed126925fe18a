//! One-time codes gating channel connect flows (coexistence onboarding).

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;

use omnihub_core::config::{OTP_ATTEMPT_LIMIT, OTP_TTL_SECS};
use omnihub_channels::error::{ChannelError, Result};

/// Outcome of a verification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpOutcome {
    Verified,
    /// Wrong code; attempts remaining before lockout.
    Mismatch { attempts_left: u32 },
    /// Code expired or attempts exhausted; a new code must be issued.
    Rejected,
}

pub struct OtpStore {
    db: Mutex<Connection>,
    ttl: Duration,
}

impl OtpStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS otp_codes (
                subject TEXT PRIMARY KEY,
                code TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                issued_at TEXT NOT NULL
            );",
        )
        .map_err(db_err)?;
        Ok(Self {
            db: Mutex::new(conn),
            ttl: Duration::seconds(OTP_TTL_SECS),
        })
    }

    /// Issue a 6-digit code for a subject, replacing any outstanding one.
    pub fn issue(&self, subject: &str, now: DateTime<Utc>) -> Result<String> {
        let code = derive_code(subject, now);
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO otp_codes (subject, code, attempts, issued_at)
             VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(subject) DO UPDATE SET code = ?2, attempts = 0, issued_at = ?3",
            rusqlite::params![subject, code, now.to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(code)
    }

    /// Check a submitted code. Three mismatches or an expired code reject
    /// the attempt and burn the stored code.
    pub fn verify(&self, subject: &str, submitted: &str, now: DateTime<Utc>) -> Result<OtpOutcome> {
        let db = self.db.lock().unwrap();
        let row = db.query_row(
            "SELECT code, attempts, issued_at FROM otp_codes WHERE subject = ?1",
            [subject],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        );
        let (code, attempts, issued_at) = match row {
            Ok(v) => v,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(OtpOutcome::Rejected),
            Err(e) => return Err(db_err(e)),
        };

        let issued = DateTime::parse_from_rfc3339(&issued_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ChannelError::Parse(format!("bad otp timestamp: {e}")))?;

        if now.signed_duration_since(issued) > self.ttl || attempts >= OTP_ATTEMPT_LIMIT {
            db.execute("DELETE FROM otp_codes WHERE subject = ?1", [subject])
                .map_err(db_err)?;
            return Ok(OtpOutcome::Rejected);
        }

        if submitted == code {
            db.execute("DELETE FROM otp_codes WHERE subject = ?1", [subject])
                .map_err(db_err)?;
            return Ok(OtpOutcome::Verified);
        }

        let attempts = attempts + 1;
        if attempts >= OTP_ATTEMPT_LIMIT {
            db.execute("DELETE FROM otp_codes WHERE subject = ?1", [subject])
                .map_err(db_err)?;
            return Ok(OtpOutcome::Rejected);
        }
        db.execute(
            "UPDATE otp_codes SET attempts = ?2 WHERE subject = ?1",
            rusqlite::params![subject, attempts],
        )
        .map_err(db_err)?;
        Ok(OtpOutcome::Mismatch {
            attempts_left: OTP_ATTEMPT_LIMIT - attempts,
        })
    }
}

/// 6-digit code from a keyed hash of subject and issue time.
fn derive_code(subject: &str, now: DateTime<Utc>) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    let mut mac = Hmac::<Sha256>::new_from_slice(subject.as_bytes()).expect("any key length works");
    mac.update(now.timestamp_nanos_opt().unwrap_or_default().to_be_bytes().as_ref());
    let digest = mac.finalize().into_bytes();
    let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % 1_000_000;
    format!("{n:06}")
}

fn db_err(e: rusqlite::Error) -> ChannelError {
    ChannelError::Parse(format!("otp store: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> OtpStore {
        OtpStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn correct_code_verifies_once() {
        let s = store();
        let now = Utc::now();
        let code = s.issue("ch1", now).unwrap();
        assert_eq!(code.len(), 6);
        assert_eq!(s.verify("ch1", &code, now).unwrap(), OtpOutcome::Verified);
        // Single use.
        assert_eq!(s.verify("ch1", &code, now).unwrap(), OtpOutcome::Rejected);
    }

    #[test]
    fn three_mismatches_lock_out() {
        let s = store();
        let now = Utc::now();
        let code = s.issue("ch1", now).unwrap();
        // A wrong code that can never collide with the issued one.
        let wrong = format!("x{}", &code[1..]);
        assert_eq!(
            s.verify("ch1", &wrong, now).unwrap(),
            OtpOutcome::Mismatch { attempts_left: 2 }
        );
        assert_eq!(
            s.verify("ch1", &wrong, now).unwrap(),
            OtpOutcome::Mismatch { attempts_left: 1 }
        );
        assert_eq!(s.verify("ch1", &wrong, now).unwrap(), OtpOutcome::Rejected);
        // Even the right code is dead now.
        assert_eq!(s.verify("ch1", &code, now).unwrap(), OtpOutcome::Rejected);
    }

    #[test]
    fn expired_code_is_rejected() {
        let s = store();
        let issued = Utc::now();
        let code = s.issue("ch1", issued).unwrap();
        let later = issued + Duration::seconds(OTP_TTL_SECS + 1);
        assert_eq!(s.verify("ch1", &code, later).unwrap(), OtpOutcome::Rejected);
    }
}
