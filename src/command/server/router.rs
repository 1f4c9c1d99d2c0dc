use hyper::Method;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Unknown,
    Healthz,
    Metrics,
    Me,
    ListDocuments,
    CreateDocuments,
    GetDocument { id: Uuid },
    UpdateDocument { id: Uuid },
    DeleteDocument { id: Uuid },
}

impl Route {
    pub fn action_name(&self) -> &'static str {
        match self {
            Route::Unknown => "unknown",
            Route::Healthz => "healthz",
            Route::Metrics => "metrics",
            Route::Me => "me",
            Route::ListDocuments => "list-documents",
            Route::CreateDocuments => "create-documents",
            Route::GetDocument { .. } => "get-document",
            Route::UpdateDocument { .. } => "update-document",
            Route::DeleteDocument { .. } => "delete-document",
        }
    }
}

pub fn parse(method: &Method, path: &str) -> Route {
    match path {
        "/healthz" if method == Method::GET => return Route::Healthz,
        "/metrics" if method == Method::GET => return Route::Metrics,
        "/api/me" if method == Method::GET => return Route::Me,
        "/api/documents" if method == Method::GET => return Route::ListDocuments,
        "/api/documents" if method == Method::POST => return Route::CreateDocuments,
        _ => {}
    }

    let Some(id) = path.strip_prefix("/api/documents/") else {
        return Route::Unknown;
    };

    let Ok(id) = Uuid::parse_str(id) else {
        return Route::Unknown;
    };

    match *method {
        Method::GET => Route::GetDocument { id },
        Method::PUT => Route::UpdateDocument { id },
        Method::DELETE => Route::DeleteDocument { id },
        _ => Route::Unknown,
    }
}
