//! Folder form actions.

use crate::auth::Principal;
use crate::error::ApiError;
use crate::handlers::common::{form_response, return_folder};
use crate::lifecycle::{namespace, trash};
use crate::state::AppState;
use axum::extract::{Form, State};
use axum::response::Response;
use serde::Deserialize;

/// Form body naming a folder inside `current`.
#[derive(Debug, Deserialize)]
pub struct FolderForm {
    pub current: Option<String>,
    pub name: String,
}

/// Form body for a folder rename.
#[derive(Debug, Deserialize)]
pub struct RenameFolderForm {
    pub current: Option<String>,
    pub old_name: String,
    pub new_name: String,
}

/// POST /folders - Create a folder.
pub async fn create_folder_form(
    State(state): State<AppState>,
    principal: Principal,
    Form(form): Form<FolderForm>,
) -> Response {
    let current = return_folder(form.current.as_deref());
    let result = async {
        let folder =
            namespace::create_folder(state.metadata.as_ref(), principal.user_id, &current, &form.name)
                .await?;
        Ok::<_, ApiError>(format!("Created folder {}", folder.folder_path))
    }
    .await;
    form_response(&current, result)
}

/// POST /folders/rename - Rename a folder and everything below it.
pub async fn rename_folder_form(
    State(state): State<AppState>,
    principal: Principal,
    Form(form): Form<RenameFolderForm>,
) -> Response {
    let current = return_folder(form.current.as_deref());
    let result = async {
        let count = namespace::rename_folder(
            state.metadata.as_ref(),
            principal.user_id,
            &current,
            &form.old_name,
            &form.new_name,
        )
        .await?;
        Ok::<_, ApiError>(format!(
            "Renamed {} to {} ({} files moved)",
            form.old_name.trim(),
            form.new_name.trim(),
            count.files
        ))
    }
    .await;
    form_response(&current, result)
}

/// POST /folders/delete - Remove an empty folder.
pub async fn delete_folder_form(
    State(state): State<AppState>,
    principal: Principal,
    Form(form): Form<FolderForm>,
) -> Response {
    let current = return_folder(form.current.as_deref());
    let result = async {
        namespace::delete_folder(state.metadata.as_ref(), principal.user_id, &current, &form.name)
            .await?;
        Ok::<_, ApiError>(format!("Deleted folder {}", form.name.trim()))
    }
    .await;
    form_response(&current, result)
}

/// POST /folders/trash - Move a folder and its subtree to the trash.
pub async fn trash_folder_form(
    State(state): State<AppState>,
    principal: Principal,
    Form(form): Form<FolderForm>,
) -> Response {
    let current = return_folder(form.current.as_deref());
    let result = async {
        let count = trash::soft_delete_folder(
            state.metadata.as_ref(),
            principal.user_id,
            &current,
            &form.name,
        )
        .await?;
        Ok::<_, ApiError>(format!(
            "Moved {} to trash ({} files)",
            form.name.trim(),
            count.files
        ))
    }
    .await;
    form_response(&current, result)
}
