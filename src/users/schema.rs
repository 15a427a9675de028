//! Form schema for the create and edit screens, independent of any UI toolkit.

use serde::Serialize;
use uuid::Uuid;

use crate::users::form::Intent;
use crate::users::password::PasswordRules;
use crate::users::photo::ACCEPTED_TYPES;
use crate::users::repo_types::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Avatar,
    Text,
    Email,
    Tel,
    Toggle,
    Password,
    Textarea,
    MultiSelect,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldOption {
    pub value: Uuid,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub visible: bool,
    /// `false` for transient UI state that never reaches storage.
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<FieldOption>>,
}

impl FieldSpec {
    fn new(name: &'static str, label: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            label,
            kind,
            required: false,
            visible: true,
            persisted: true,
            max_length: None,
            accept: None,
            options: None,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

pub fn form_schema(intent: Intent, rules: &PasswordRules, roles: &[Role]) -> Vec<FieldSpec> {
    let password_visible = intent.password_visible();

    let mut photo = FieldSpec::new("photo", "Photo", FieldKind::Avatar);
    photo.accept = Some(ACCEPTED_TYPES.iter().map(|(mime, _)| *mime).collect());

    let mut reset_password = FieldSpec::new("reset_password", "Reset password", FieldKind::Toggle);
    reset_password.visible = !matches!(intent, Intent::Create);
    reset_password.persisted = false;

    let mut password = FieldSpec::new("password", "Password", FieldKind::Password);
    password.visible = password_visible;
    password.required = password_visible;
    password.persisted = password_visible;
    password.max_length = Some(rules.max_len);

    let mut role_ids = FieldSpec::new("role_ids", "Roles", FieldKind::MultiSelect);
    role_ids.options = Some(
        roles
            .iter()
            .map(|r| FieldOption {
                value: r.id,
                label: r.name.clone(),
            })
            .collect(),
    );

    vec![
        photo,
        FieldSpec::new("name", "Name", FieldKind::Text).required(),
        FieldSpec::new("email", "Email", FieldKind::Email).required(),
        FieldSpec::new("telp", "Telp", FieldKind::Tel),
        reset_password,
        password,
        FieldSpec::new("address", "Address", FieldKind::Textarea),
        role_ids,
    ]
}
