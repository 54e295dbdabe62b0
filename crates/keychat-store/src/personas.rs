//! Local persona records, mirrored from the identity gateway.

use rusqlite::params;

use keychat_shared::PersonaStatus;

use crate::database::Database;
use crate::error::Result;
use crate::models::PersonaRecord;

impl Database {
    /// Insert or update a persona keyed by display name.
    pub fn upsert_persona(&self, persona: &PersonaRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO personas (name, sub_name, uri, status)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                 sub_name = excluded.sub_name,
                 uri = COALESCE(excluded.uri, personas.uri),
                 status = excluded.status",
            params![
                persona.name,
                persona.sub_name,
                persona.uri,
                persona.status.code(),
            ],
        )?;
        Ok(())
    }

    pub fn list_personas(&self) -> Result<Vec<PersonaRecord>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT name, sub_name, uri, status FROM personas ORDER BY name")?;
        let rows = stmt.query_map([], row_to_persona)?;

        let mut personas = Vec::new();
        for row in rows {
            personas.push(row?);
        }
        Ok(personas)
    }

    pub fn delete_persona(&self, name: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM personas WHERE name = ?1", params![name])?;
        Ok(affected > 0)
    }
}

fn row_to_persona(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersonaRecord> {
    let code: i64 = row.get(3)?;
    let status = PersonaStatus::from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Integer,
            format!("unknown persona status {code}").into(),
        )
    })?;

    Ok(PersonaRecord {
        name: row.get(0)?,
        sub_name: row.get(1)?,
        uri: row.get(2)?,
        status,
    })
}
