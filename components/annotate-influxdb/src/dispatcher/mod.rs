//! Annotation dispatch: settings in, one written point out.
pub mod dispatcher;
