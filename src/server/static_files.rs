//! Handlers for static file service
//!
//! This is where requests land when they bypass the gateway.

use super::{Handler, Request, Response};
use super::error_messages::*;
use crate::config::StaticFilesConfig;
use crate::errors::*;
use crate::filesystem::normalize_path;

use log::warn;

use std::ffi::OsStr;
use std::fs::{canonicalize, File};
use std::io::ErrorKind;
use std::os::unix::ffi::OsStrExt;

/// A handler for static files
pub struct Statics {
    conf: StaticFilesConfig
}

impl Statics {
    pub fn new(conf: StaticFilesConfig) -> Statics {
        Statics { conf }
    }

    fn serve_file(&self, req: Request, mut res: Response) -> Result<()> {
        // The wire path arrives verbatim; decode and collapse it before it
        // touches the filesystem. The query, if any, is not part of the
        // file name.
        let path = req.path();
        let document = path.split('?').next().unwrap_or(path);
        let relative = normalize_path(document.as_bytes())?;

        let requested_file =
            match canonicalize(self.conf.webroot
                               .join(OsStr::from_bytes(&relative))) {
                Ok(f) => f,
                Err(e) => {
                    match e.kind() {
                        ErrorKind::NotFound => error_404(res)?,
                        _ => error_500(res)?
                    };

                    return Err(Error::from(e));
                }
            };

        if !requested_file.starts_with(&self.conf.webroot) {
            let _ = error_403(res);
            return Err(Error::PermissionDenied);
        }

        let file = match File::open(&requested_file) {
            Ok(f) => f,
            Err(e) => {
                match e.kind() {
                    ErrorKind::NotFound => error_404(res)?,
                    _ => error_500(res)?
                };

                return Err(Error::from(e));
            }
        };

        let meta = match file.metadata() {
            Ok(m) => m,
            Err(e) => {
                error_500(res)?;
                return Err(Error::from(e));
            }
        };

        if meta.is_dir() {
            error_403(res)?;
            return Err(Error::PermissionDenied);
        }

        let mime = mime_guess::from_path(&requested_file)
            .first_or_octet_stream();

        res.headers_mut().insert("Content-Type",
                                 Vec::from(mime.essence_str().as_bytes()));
        res.headers_mut().insert("Content-Length",
                                 meta.len().to_string().into_bytes());

        Ok(res.of_stream(file)?)
    }
}

impl Handler for Statics {
    fn serve(&self, req: Request, res: Response) {
        match self.serve_file(req, res) {
            Ok(_) => (),
            Err(e) => warn!("Error serving a file: {:?}", e)
        }
    }
}
