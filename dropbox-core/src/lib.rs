mod client;
mod oauth;

pub use client::{
    Account, ApiErrorClass, Download, DropboxClient, DropboxError, FileMetadata, FolderMetadata,
    ListFolderResult, Metadata, api_arg_header,
};
pub use oauth::{OAuthClient, OAuthError, OAuthToken};
