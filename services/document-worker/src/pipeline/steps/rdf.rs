//! RDF serialization conversion.

use super::{require_input, StepOptions};
use crate::pipeline::error::{FormatError, PipelineError};
use crate::pipeline::file::{DocumentFile, FileFormat};
use oxrdfio::{RdfFormat, RdfParser, RdfSerializer};

const RDF_FORMATS: &[(FileFormat, RdfFormat)] = &[
    (FileFormat::TURTLE, RdfFormat::Turtle),
    (FileFormat::N_TRIPLES, RdfFormat::NTriples),
    (FileFormat::N_QUADS, RdfFormat::NQuads),
    (FileFormat::TRIG, RdfFormat::TriG),
    (FileFormat::RDF_XML, RdfFormat::RdfXml),
];

/// Re-serializes RDF from one syntax to another.
#[derive(Debug, Clone)]
pub struct RdfConvertStep {
    from: (FileFormat, RdfFormat),
    to: (FileFormat, RdfFormat),
}

impl RdfConvertStep {
    pub(crate) const NAME: &'static str = "rdf-convert";

    pub(crate) fn new(options: &StepOptions<'_>) -> Result<Self, FormatError> {
        let pick = |key: &str| {
            let name = options.require(key)?;
            RDF_FORMATS
                .iter()
                .find(|(format, _)| format.name() == name)
                .cloned()
                .ok_or_else(|| FormatError::invalid(Self::NAME, key, format!("unsupported RDF format '{name}'")))
        };
        Ok(Self {
            from: pick("from")?,
            to: pick("to")?,
        })
    }

    pub(crate) fn accepts(&self, format: &FileFormat) -> bool {
        *format == self.from.0
    }

    pub(crate) fn output(&self) -> FileFormat {
        self.to.0.clone()
    }

    pub(crate) async fn execute(&self, file: DocumentFile) -> Result<DocumentFile, PipelineError> {
        require_input(Self::NAME, &file, |format| self.accepts(format))?;
        let (from, to) = (self.from.1, self.to.1);
        let converted = tokio::task::spawn_blocking(move || convert(from, to, &file.content))
            .await
            .map_err(|err| PipelineError::step(Self::NAME, format!("conversion task failed: {err}")))?
            .map_err(|message| PipelineError::step(Self::NAME, message))?;
        Ok(DocumentFile::new(self.output(), converted))
    }
}

fn convert(from: RdfFormat, to: RdfFormat, input: &[u8]) -> Result<Vec<u8>, String> {
    let mut serializer = RdfSerializer::from_format(to).for_writer(Vec::new());
    for quad in RdfParser::from_format(from).for_reader(input) {
        let quad = quad.map_err(|err| format!("invalid {from} input: {err}"))?;
        serializer
            .serialize_quad(&quad)
            .map_err(|err| format!("cannot write {to}: {err}"))?;
    }
    serializer.finish().map_err(|err| format!("cannot write {to}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const TURTLE: &str = "@prefix ex: <http://example.com/> .\nex:plan ex:title \"Data plan\" .\n";

    fn step(from: &str, to: &str) -> Result<RdfConvertStep, FormatError> {
        let options: HashMap<String, String> =
            [("from".to_string(), from.to_string()), ("to".to_string(), to.to_string())]
                .into_iter()
                .collect();
        RdfConvertStep::new(&StepOptions::new(RdfConvertStep::NAME, &options))
    }

    #[tokio::test]
    async fn test_turtle_to_ntriples() {
        let converter = step("turtle", "n-triples").unwrap();
        let file = DocumentFile::new(FileFormat::TURTLE, TURTLE.as_bytes().to_vec());
        let out = converter.execute(file).await.unwrap();
        assert_eq!(out.format, FileFormat::N_TRIPLES);
        assert_eq!(
            String::from_utf8(out.content).unwrap().trim(),
            "<http://example.com/plan> <http://example.com/title> \"Data plan\" ."
        );
    }

    #[tokio::test]
    async fn test_malformed_input_fails_step() {
        let converter = step("turtle", "rdf-xml").unwrap();
        let file = DocumentFile::new(FileFormat::TURTLE, b"ex:plan ex:title".to_vec());
        let err = converter.execute(file).await.unwrap_err();
        assert_eq!(err.step_name(), "rdf-convert");
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!(step("turtle", "json-ld").is_err());
    }
}
