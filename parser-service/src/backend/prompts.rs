//! Instruction text shared by all backends.

/// Standing instructions for every extraction request
pub const SYSTEM_PROMPT: &str = "\
You are an expert at reading prescription and specialty pharmacy order forms. \
Forms may be scanned, faxed or photographed, and may be handwritten or low quality.
Extract the prescription data into a JSON object that follows the provided schema.

Use your knowledge of medical prescriptions to resolve ambiguous or unclear characters \
from context. Only fill fields for which the document contains relevant data.

INPUT:
A single or multi-page image or PDF containing one prescription or order form.

OUTPUT:
One JSON object matching the schema.

GENERAL RULES:
\t- When no other date is given, use the signature date as date_written.
\t- Record weight and height in the units written on the form. Never convert units.
\t- Phone numbers belonging to the prescriber's office or an insurer must not be used for the patient or the emergency contact.
\t- Attach every name, phone number and address to the entity it belongs to: patient, prescriber, insurer or office staff.
\t- Write phone numbers as digits only (e.g. 7035550142), without punctuation, spaces, parentheses or plus signs.
\t- Leave ndc empty unless a National Drug Code is clearly printed. Never substitute an NPI or license number.
\t- Insurance group number, ID number and phone number must come from their own labeled fields.
\t- Fill emergency_contact only when the form clearly designates one. The prescriber or office contact is not an emergency contact.
\t- Watch for look-alike digits such as 1 and 7 or 1 and 2, and use surrounding context to check numbers.

MEDICATIONS:
\t- Copy the directions verbatim into sig and write a plain English version in administration_notes.
\t  Example: sig \"25mg tab po qd\", administration_notes \"Take one 25 mg tablet by mouth once daily\".
\t- daw_code (Dispense As Written) depends on where the prescriber signed:
\t\t- Signature on or next to a line labeled \"Substitution permitted\" (or similar): daw_code 0.
\t\t- Signature on or next to a line labeled \"Dispense as written\" or \"Do not substitute\": daw_code 1.
\t\t- Decide from the signature position only, never from defaults.
\t\t- If the signature is not clearly on either line, use daw_code 0.

CHECKBOXES:
\t- Forms often list several drugs or strengths with checkboxes.
\t- Include only options that are checked, crossed, filled or circled.
\t- Always fill drug_name for a selected option.
\t- When a selected drug lists several strengths or forms, keep only the ones that are marked.

CLINICAL INFO:
\t- Put values such as BSA, genetic markers or lab checkboxes in clinical_info as \"Label: result\" (e.g. \"BSA: 1.7 m²\").

ATTACHMENTS:
\t- Set an attachment flag only when the form explicitly says that document is attached, usually with a checkbox or note.
\t- Otherwise leave it false. Mentioning related information, such as insurance details, does not mean the card is attached.
";

/// Per-document extraction request
pub const PARSE_PROMPT: &str =
    "Parse the provided prescription image into a JSON object according to the schema provided.";

/// Follow-up turn asking the model to check its previous answer
pub const REVIEW_PROMPT: &str = "\
Review the most recent prescription JSON against the provided prescription image.

Check it carefully for accuracy, especially the fields that are often misread:

- Numbers such as quantity, refills, weight and group numbers must be transcribed exactly. Watch for scanning mistakes like 1 versus 2.
- drug_name must contain each medication whose checkbox is marked or circled on the form.
- daw_code must follow the label of the line the prescriber signed on:
\t- \"Dispense as written\" or \"Do not substitute\": daw_code 1.
\t- \"Substitution permitted\": daw_code 0.
\t- Ambiguous position: daw_code 0.
Return the corrected JSON output. If the original response was fully correct, return it unchanged.";

/// Grading instructions for comparing parser output with a validated document
pub const SCORING_PROMPT: &str = "\
You grade the output of a prescription parser against a validated expected result.

Compare the two JSON objects below field by field. Evaluate every leaf field that is present \
in either object, using dot notation for its path (e.g. patient.first_name, medications[0].strength). \
Match list entries by meaning rather than position when their order differs.

Score each field with exactly one of these values:
- 1.0: the values are identical or equivalent (differences only in case, whitespace, punctuation or formatting).
- 0.75: the values are nearly equivalent, with a minor difference that would not change how the prescription is filled.
- 0.25: the value is partially correct but a reviewer would have to correct it.
- 0.0: the value is wrong, missing, or present when the expected value is empty.

Fields that are empty in both objects are not evaluated.
Each evaluated field is worth one possible point. Report the sum of awarded points, the total possible points, \
the percentage (awarded / possible * 100) and a short critique summarizing where the parser went wrong.

";

/// Full grading request text
pub fn scoring_request(expected_json: &str, output_json: &str) -> String {
    format!(
        "{SCORING_PROMPT}Here are the JSON objects to compare:\n\n\
         Validated Expected JSON:\n{expected_json}\n\n\
         Parser Output JSON:\n{output_json}"
    )
}
