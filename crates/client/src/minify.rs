//! Minification of combined CSS/JS parts and inline script bodies.
//!
//! Uses lightningcss for CSS, oxc for JavaScript and serde_json for JSON.

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier as OxcMinifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::span::SourceType;

use htmlc_core::Error;

/// Inputs above this size are passed through untouched.
pub const MAX_MINIFY_BYTES: usize = 1_000_000;

/// Language of a block of code handed to a [`Minifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    Css,
    Js,
    Json,
}

/// Token-level minifier. Failures are recoverable: callers keep the original code.
pub trait Minifier: Send + Sync {
    fn css(&self, code: &str) -> Result<String, Error>;

    fn js(&self, code: &str) -> Result<String, Error>;

    fn json(&self, code: &str) -> Result<String, Error>;
}

/// lightningcss + oxc + serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMinifier;

impl Minifier for DefaultMinifier {
    fn css(&self, code: &str) -> Result<String, Error> {
        let mut stylesheet = StyleSheet::parse(code, ParserOptions::default()).map_err(|e| Error::Minify(e.to_string()))?;
        stylesheet.minify(MinifyOptions::default()).map_err(|e| Error::Minify(e.to_string()))?;
        let result = stylesheet
            .to_css(PrinterOptions { minify: true, ..PrinterOptions::default() })
            .map_err(|e| Error::Minify(e.to_string()))?;
        Ok(result.code)
    }

    fn js(&self, code: &str) -> Result<String, Error> {
        let allocator = Allocator::default();
        // Classic script: combined files share one global scope.
        let source_type = SourceType::mjs().with_module(false);
        let ret = Parser::new(&allocator, code, source_type).parse();
        if !ret.errors.is_empty() {
            return Err(Error::Minify(format!("{} JavaScript parse error(s)", ret.errors.len())));
        }
        let mut program = ret.program;
        let options = MinifierOptions { mangle: Some(MangleOptions::default()), compress: Some(CompressOptions::default()) };
        let ret = OxcMinifier::new(options).minify(&allocator, &mut program);
        let code = Codegen::new()
            .with_options(CodegenOptions { minify: true, comments: CommentOptions::disabled(), ..CodegenOptions::default() })
            .with_scoping(ret.scoping)
            .build(&program)
            .code;
        Ok(code)
    }

    fn json(&self, code: &str) -> Result<String, Error> {
        let value: serde_json::Value = serde_json::from_str(code).map_err(|e| Error::Minify(e.to_string()))?;
        serde_json::to_string(&value).map_err(|e| Error::Minify(e.to_string()))
    }
}

/// Minify `code`, or `None` when it is skipped or the minifier fails.
pub fn try_minify(minifier: &dyn Minifier, lang: Lang, code: &str) -> Option<String> {
    if code.trim().is_empty() {
        return None;
    }
    if code.len() > MAX_MINIFY_BYTES {
        tracing::debug!(?lang, bytes = code.len(), "skipping minification of oversized code");
        return None;
    }
    let result = match lang {
        Lang::Css => minifier.css(code),
        Lang::Js => minifier.js(code),
        Lang::Json => minifier.json(code),
    };
    match result {
        Ok(minified) if !minified.trim().is_empty() => Some(minified),
        Ok(_) => None,
        Err(err) => {
            tracing::warn!(?lang, error = %err, "minification failed; keeping original code");
            None
        }
    }
}

/// Minify `code`, falling back to the original.
pub fn minify_or_original(minifier: &dyn Minifier, lang: Lang, code: &str) -> String {
    try_minify(minifier, lang, code).unwrap_or_else(|| code.to_string())
}
