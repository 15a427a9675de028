use anyhow::Context;
use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use csv::Writer;
use time::{format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime};

use super::repo_types::User;

/// Exported columns, in order: (field, header).
pub const EXPORT_COLUMNS: [(&str, &str); 5] = [
    ("name", "Name"),
    ("email", "Email"),
    ("telp", "Telp"),
    ("address", "Address"),
    ("created_at", "Created at"),
];

pub struct ExportFile {
    pub filename: String,
    pub body: Vec<u8>,
    pub rows: usize,
}

impl IntoResponse for ExportFile {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", self.filename),
                ),
            ],
            self.body,
        )
            .into_response()
    }
}

fn cell(user: &User, field: &str) -> anyhow::Result<String> {
    Ok(match field {
        "name" => user.name.clone(),
        "email" => user.email.clone(),
        "telp" => user.telp.clone().unwrap_or_default(),
        "address" => user.address.clone().unwrap_or_default(),
        "created_at" => user
            .created_at
            .format(&Rfc3339)
            .context("format created_at")?,
        other => anyhow::bail!("unknown export column {}", other),
    })
}

pub fn users_to_csv(users: &[User]) -> anyhow::Result<Vec<u8>> {
    let mut writer = Writer::from_writer(Vec::new());
    writer
        .write_record(EXPORT_COLUMNS.iter().map(|(_, label)| *label))
        .context("write csv header")?;
    for user in users {
        let row = EXPORT_COLUMNS
            .iter()
            .map(|(field, _)| cell(user, field))
            .collect::<anyhow::Result<Vec<_>>>()?;
        writer.write_record(&row).context("write csv row")?;
    }
    writer.flush().context("flush csv writer")?;
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("finish csv: {}", e))
}

pub fn export_filename(now: OffsetDateTime) -> anyhow::Result<String> {
    let stamp = now
        .format(format_description!("[year][month][day]-[hour][minute][second]"))
        .context("format export timestamp")?;
    Ok(format!("users-{}.csv", stamp))
}

pub fn export(users: &[User]) -> anyhow::Result<ExportFile> {
    Ok(ExportFile {
        filename: export_filename(OffsetDateTime::now_utc())?,
        body: users_to_csv(users)?,
        rows: users.len(),
    })
}
