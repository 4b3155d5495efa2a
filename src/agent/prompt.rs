//! Instruction text for the assistant.

/// Instructions attached to the assistant for the whole run.
pub fn default_instructions() -> &'static str {
    "Use the tools to read the files in the given directory, \n\
     answer questions based on those files, \n\
     and interact with the files following the user's command.\n"
}
