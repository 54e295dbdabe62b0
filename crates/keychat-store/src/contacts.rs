//! CRUD operations for [`Contact`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::Contact;

impl Database {
    /// Insert or update a contact keyed by URI. The original `created_at` is
    /// kept on update.
    pub fn save_contact(&self, contact: &Contact) -> Result<()> {
        self.conn().execute(
            "INSERT INTO contacts (uri, name, sub_name, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(uri) DO UPDATE SET name = excluded.name, sub_name = excluded.sub_name",
            params![
                contact.uri,
                contact.name,
                contact.sub_name,
                contact.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_contact(&self, uri: &str) -> Result<Contact> {
        self.conn()
            .query_row(
                "SELECT uri, name, sub_name, created_at FROM contacts WHERE uri = ?1",
                params![uri],
                row_to_contact,
            )
            .map_err(not_found)
    }

    pub fn find_contact(&self, uri: &str) -> Result<Option<Contact>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT uri, name, sub_name, created_at FROM contacts WHERE uri = ?1",
                params![uri],
                row_to_contact,
            )
            .optional()?)
    }

    /// All contacts, ordered by name.
    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT uri, name, sub_name, created_at
             FROM contacts
             ORDER BY name COLLATE NOCASE, uri",
        )?;

        let rows = stmt.query_map([], row_to_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    pub fn rename_contact(&self, uri: &str, name: &str, sub_name: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE contacts SET name = ?2, sub_name = ?3 WHERE uri = ?1",
            params![uri, name, sub_name],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn delete_contact(&self, uri: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM contacts WHERE uri = ?1", params![uri])?;
        Ok(affected > 0)
    }
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let ts_str: String = row.get(3)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Contact {
        uri: row.get(0)?,
        name: row.get(1)?,
        sub_name: row.get(2)?,
        created_at,
    })
}
