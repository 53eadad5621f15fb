use ingest::Chunk;

pub fn build_extraction_prompt(chunk: &Chunk, schema_description: &str) -> String {
    let mut source = String::new();
    for segment in &chunk.segments {
        source.push_str(&format!("[page {}] {}\n", segment.page, segment.text));
    }
    for table in &chunk.tables {
        source.push_str(&format!("[table {} on page {}]\n{}\n", table.index, table.page, table.render()));
    }

    format!(
        r#"Extract structured entities from the following document excerpt.

INSTRUCTIONS:
1. Fill in only the entity kinds and fields declared in the schema
2. Use values stated in the text; never guess or invent a value
3. Leave out any field the text does not state
4. Output ONLY valid JSON, nothing else

SCHEMA:
{schema_description}

OUTPUT FORMAT:
{{
  "entities": {{
    "KindName": [
      {{"field_name": "value"}}
    ]
  }}
}}

RULES:
- Dates must be written as YYYY-MM-DD
- Numbers must be plain JSON numbers without units
- Enum fields must use one of the allowed values exactly
- Kinds with cardinality "many" may have several objects, one per record
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
{source}
JSON OUTPUT:"#
    )
}

pub fn build_retry_prompt(original_prompt: &str, invalid_output: &str) -> String {
    format!(
        r#"{original_prompt}

Your previous answer was not valid JSON:

{invalid_output}

Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#
    )
}
