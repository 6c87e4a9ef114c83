use clap::ValueEnum;

#[derive(Copy, Clone, ValueEnum)]
pub(crate) enum EmbedMode {
    Onnx,
    Stub,
}

impl EmbedMode {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            EmbedMode::Onnx => "onnx",
            EmbedMode::Stub => "stub",
        }
    }
}
